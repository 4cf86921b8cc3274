//! Run record persistence

use sqlx::{Row, SqlitePool};
use tenk_common::{Error, Result};
use uuid::Uuid;

use crate::models::{Candidate, Run, RunStatus, TriggerSource};

/// Insert or update a run record
pub async fn save_run(pool: &SqlitePool, run: &Run) -> Result<()> {
    let companies = serde_json::to_string(&run.companies_selected)
        .map_err(|e| Error::Internal(format!("Failed to serialize shortlist: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO runs (
            run_id, triggered_by, trigger_time, status, companies_selected,
            companies_analyzed, companies_skipped, companies_failed,
            job_id, error_message, started_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id) DO UPDATE SET
            status = excluded.status,
            companies_selected = excluded.companies_selected,
            companies_analyzed = excluded.companies_analyzed,
            companies_skipped = excluded.companies_skipped,
            companies_failed = excluded.companies_failed,
            job_id = excluded.job_id,
            error_message = excluded.error_message,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(run.triggered_by.as_str())
    .bind(run.trigger_time.to_rfc3339())
    .bind(run.status.as_str())
    .bind(&companies)
    .bind(run.companies_analyzed)
    .bind(run.companies_skipped)
    .bind(run.companies_failed)
    .bind(run.job_id.map(|id| id.to_string()))
    .bind(&run.error_message)
    .bind(run.started_at.map(|dt| dt.to_rfc3339()))
    .bind(run.completed_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Run> {
    let run_id: String = row.get("run_id");
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| Error::Internal(format!("Failed to parse run_id: {}", e)))?;

    let triggered_by: String = row.get("triggered_by");
    let triggered_by = match triggered_by.as_str() {
        "timer" => TriggerSource::Timer,
        "manual" => TriggerSource::Manual,
        "continuous" => TriggerSource::Continuous,
        other => return Err(Error::Internal(format!("Unknown trigger source: {}", other))),
    };

    let status: String = row.get("status");
    let status = RunStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown run status: {}", status)))?;

    let companies: String = row.get("companies_selected");
    let companies_selected: Vec<Candidate> = serde_json::from_str(&companies)
        .map_err(|e| Error::Internal(format!("Failed to deserialize shortlist: {}", e)))?;

    let job_id: Option<String> = row.get("job_id");
    let job_id = job_id
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;

    let trigger_time: String = row.get("trigger_time");

    Ok(Run {
        run_id,
        triggered_by,
        trigger_time: super::parse_ts("trigger_time", &trigger_time)?,
        status,
        companies_selected,
        companies_analyzed: row.get("companies_analyzed"),
        companies_skipped: row.get("companies_skipped"),
        companies_failed: row.get("companies_failed"),
        job_id,
        error_message: row.get("error_message"),
        started_at: super::parse_ts_opt("started_at", row.get("started_at"))?,
        completed_at: super::parse_ts_opt("completed_at", row.get("completed_at"))?,
    })
}

const RUN_COLUMNS: &str = "run_id, triggered_by, trigger_time, status, companies_selected, \
     companies_analyzed, companies_skipped, companies_failed, \
     job_id, error_message, started_at, completed_at";

/// Load one run by id
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<Run>> {
    let row = sqlx::query(&format!("SELECT {} FROM runs WHERE run_id = ?", RUN_COLUMNS))
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| run_from_row(&r)).transpose()
}

/// Most recent runs, newest first
pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<Run>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM runs ORDER BY trigger_time DESC LIMIT ?",
        RUN_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}

/// Trigger time of the most recent run in any state, used to suppress
/// coalesced duplicate timer fires
pub async fn last_trigger_time(
    pool: &SqlitePool,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT MAX(trigger_time) FROM runs")
            .fetch_one(pool)
            .await?;

    super::parse_ts_opt("trigger_time", value)
}

/// Mark non-terminal runs from a previous process as failed.
///
/// A run left pending or running when the process died will never progress;
/// its background task is gone.
pub async fn cleanup_stale_runs(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE runs
        SET status = 'failed',
            error_message = 'Run abandoned: engine was restarted',
            completed_at = ?
        WHERE status IN ('pending', 'running')
        "#,
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}
