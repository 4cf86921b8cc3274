//! Batch job persistence

use sqlx::{Row, SqlitePool};
use tenk_common::{Error, Result};
use uuid::Uuid;

use crate::models::{BatchJob, Candidate, JobStatus};

/// Insert or update a batch job record
pub async fn save_job(pool: &SqlitePool, job: &BatchJob) -> Result<()> {
    let companies = serde_json::to_string(&job.companies)
        .map_err(|e| Error::Internal(format!("Failed to serialize job companies: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO batch_jobs (
            job_id, run_id, status, companies, total, completed, failed, skipped,
            current_company, current_step, avg_seconds_per_company,
            error_message, created_at, started_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id) DO UPDATE SET
            status = excluded.status,
            completed = excluded.completed,
            failed = excluded.failed,
            skipped = excluded.skipped,
            current_company = excluded.current_company,
            current_step = excluded.current_step,
            avg_seconds_per_company = excluded.avg_seconds_per_company,
            error_message = excluded.error_message,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(job.run_id.map(|id| id.to_string()))
    .bind(job.status.as_str())
    .bind(&companies)
    .bind(job.total)
    .bind(job.completed)
    .bind(job.failed)
    .bind(job.skipped)
    .bind(&job.current_company)
    .bind(&job.current_step)
    .bind(job.avg_seconds_per_company)
    .bind(&job.error_message)
    .bind(job.created_at.to_rfc3339())
    .bind(job.started_at.map(|dt| dt.to_rfc3339()))
    .bind(job.completed_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BatchJob> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;

    let run_id: Option<String> = row.get("run_id");
    let run_id = run_id
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse run_id: {}", e)))?;

    let status: String = row.get("status");
    let status = JobStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown job status: {}", status)))?;

    let companies: String = row.get("companies");
    let companies: Vec<Candidate> = serde_json::from_str(&companies)
        .map_err(|e| Error::Internal(format!("Failed to deserialize job companies: {}", e)))?;

    let created_at: String = row.get("created_at");

    Ok(BatchJob {
        job_id,
        run_id,
        status,
        companies,
        total: row.get("total"),
        completed: row.get("completed"),
        failed: row.get("failed"),
        skipped: row.get("skipped"),
        current_company: row.get("current_company"),
        current_step: row.get("current_step"),
        avg_seconds_per_company: row.get("avg_seconds_per_company"),
        error_message: row.get("error_message"),
        created_at: super::parse_ts("created_at", &created_at)?,
        started_at: super::parse_ts_opt("started_at", row.get("started_at"))?,
        completed_at: super::parse_ts_opt("completed_at", row.get("completed_at"))?,
    })
}

const JOB_COLUMNS: &str = "job_id, run_id, status, companies, total, completed, failed, skipped, \
     current_company, current_step, avg_seconds_per_company, \
     error_message, created_at, started_at, completed_at";

/// Load one job by id
pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<BatchJob>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM batch_jobs WHERE job_id = ?",
        JOB_COLUMNS
    ))
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| job_from_row(&r)).transpose()
}

/// Most recent jobs, newest first
pub async fn recent_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<BatchJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM batch_jobs ORDER BY created_at DESC LIMIT ?",
        JOB_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Mark non-terminal jobs from a previous process as failed
pub async fn cleanup_stale_jobs(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE batch_jobs
        SET status = 'failed',
            error_message = 'Job abandoned: engine was restarted',
            completed_at = ?
        WHERE status IN ('queued', 'running')
        "#,
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}
