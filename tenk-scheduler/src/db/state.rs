//! Scheduler settings, liveness, and the single-flight job claim

use sqlx::{Row, SqlitePool};
use tenk_common::{Error, Result};
use uuid::Uuid;

use crate::models::{SchedulerLiveness, SchedulerSettings};

/// Load durable settings, inserting defaults on first run
pub async fn load_settings(pool: &SqlitePool) -> Result<SchedulerSettings> {
    let row = sqlx::query("SELECT settings FROM scheduler_state WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let json: String = row.get("settings");
            serde_json::from_str(&json)
                .map_err(|e| Error::Internal(format!("Failed to deserialize settings: {}", e)))
        }
        None => {
            let settings = SchedulerSettings::default();
            save_settings(pool, &settings).await?;
            Ok(settings)
        }
    }
}

/// Persist settings, preserving any active job claim
pub async fn save_settings(pool: &SqlitePool, settings: &SchedulerSettings) -> Result<()> {
    let json = serde_json::to_string(settings)
        .map_err(|e| Error::Internal(format!("Failed to serialize settings: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO scheduler_state (id, settings, current_job_id, updated_at)
        VALUES (1, ?, NULL, ?)
        ON CONFLICT(id) DO UPDATE SET
            settings = excluded.settings,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&json)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Atomically claim the single-flight slot for a job.
///
/// Returns `false` when another job already holds the claim. The conditional
/// UPDATE makes concurrent claimants race safely: exactly one sees a row
/// affected.
pub async fn claim_current_job(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scheduler_state
        SET current_job_id = ?, updated_at = ?
        WHERE id = 1 AND current_job_id IS NULL
        "#,
    )
    .bind(job_id.to_string())
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Release the single-flight slot. Only the holder's id releases it.
pub async fn release_current_job(pool: &SqlitePool, job_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scheduler_state
        SET current_job_id = NULL, updated_at = ?
        WHERE id = 1 AND current_job_id = ?
        "#,
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Return the job id currently holding the single-flight slot, if any
pub async fn current_job(pool: &SqlitePool) -> Result<Option<Uuid>> {
    let row = sqlx::query("SELECT current_job_id FROM scheduler_state WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let id: Option<String> = row.get("current_job_id");
            id.map(|s| {
                Uuid::parse_str(&s)
                    .map_err(|e| Error::Internal(format!("Failed to parse current_job_id: {}", e)))
            })
            .transpose()
        }
        None => Ok(None),
    }
}

/// Clear any stale job claim left behind by a previous process
pub async fn clear_stale_claim(pool: &SqlitePool) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scheduler_state
        SET current_job_id = NULL, updated_at = ?
        WHERE id = 1 AND current_job_id IS NOT NULL
        "#,
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load the liveness record, defaulting to zeroes when absent
pub async fn load_liveness(pool: &SqlitePool) -> Result<SchedulerLiveness> {
    let row = sqlx::query(
        r#"
        SELECT next_wake_at, last_wake_at, total_runs, successful_runs, failed_runs
        FROM scheduler_liveness
        WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(SchedulerLiveness {
            next_wake_at: super::parse_ts_opt("next_wake_at", row.get("next_wake_at"))?,
            last_wake_at: super::parse_ts_opt("last_wake_at", row.get("last_wake_at"))?,
            total_runs: row.get("total_runs"),
            successful_runs: row.get("successful_runs"),
            failed_runs: row.get("failed_runs"),
        }),
        None => Ok(SchedulerLiveness::default()),
    }
}

/// Persist the liveness record
pub async fn save_liveness(pool: &SqlitePool, liveness: &SchedulerLiveness) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO scheduler_liveness (
            id, next_wake_at, last_wake_at, total_runs, successful_runs, failed_runs
        ) VALUES (1, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            next_wake_at = excluded.next_wake_at,
            last_wake_at = excluded.last_wake_at,
            total_runs = excluded.total_runs,
            successful_runs = excluded.successful_runs,
            failed_runs = excluded.failed_runs
        "#,
    )
    .bind(liveness.next_wake_at.map(|dt| dt.to_rfc3339()))
    .bind(liveness.last_wake_at.map(|dt| dt.to_rfc3339()))
    .bind(liveness.total_runs)
    .bind(liveness.successful_runs)
    .bind(liveness.failed_runs)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::models::RunMode;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("tenk.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_settings_default_then_roundtrip() {
        let (_dir, pool) = test_pool().await;

        let settings = load_settings(&pool).await.unwrap();
        assert_eq!(settings.mode, RunMode::Stopped);

        let mut updated = settings.clone();
        updated.mode = RunMode::Continuous { delay_minutes: 15 };
        updated.batch_size = 25;
        save_settings(&pool, &updated).await.unwrap();

        let reloaded = load_settings(&pool).await.unwrap();
        assert_eq!(reloaded.mode, RunMode::Continuous { delay_minutes: 15 });
        assert_eq!(reloaded.batch_size, 25);
    }

    #[tokio::test]
    async fn test_single_flight_claim() {
        let (_dir, pool) = test_pool().await;
        load_settings(&pool).await.unwrap(); // ensure the singleton row exists

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(claim_current_job(&pool, first).await.unwrap());
        // Second claimant is refused while the first holds the slot
        assert!(!claim_current_job(&pool, second).await.unwrap());
        assert_eq!(current_job(&pool).await.unwrap(), Some(first));

        // A non-holder release is a no-op
        release_current_job(&pool, second).await.unwrap();
        assert_eq!(current_job(&pool).await.unwrap(), Some(first));

        release_current_job(&pool, first).await.unwrap();
        assert_eq!(current_job(&pool).await.unwrap(), None);
        assert!(claim_current_job(&pool, second).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_claim_cleared_on_boot() {
        let (_dir, pool) = test_pool().await;
        load_settings(&pool).await.unwrap();

        let orphan = Uuid::new_v4();
        assert!(claim_current_job(&pool, orphan).await.unwrap());

        assert!(clear_stale_claim(&pool).await.unwrap());
        assert_eq!(current_job(&pool).await.unwrap(), None);
        // Nothing left to clear
        assert!(!clear_stale_claim(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_liveness_roundtrip() {
        let (_dir, pool) = test_pool().await;

        let empty = load_liveness(&pool).await.unwrap();
        assert_eq!(empty.total_runs, 0);

        let liveness = SchedulerLiveness {
            next_wake_at: Some(chrono::Utc::now()),
            last_wake_at: Some(chrono::Utc::now()),
            total_runs: 7,
            successful_runs: 6,
            failed_runs: 1,
        };
        save_liveness(&pool, &liveness).await.unwrap();

        let reloaded = load_liveness(&pool).await.unwrap();
        assert_eq!(reloaded.total_runs, 7);
        assert_eq!(reloaded.failed_runs, 1);
        assert!(reloaded.next_wake_at.is_some());
    }
}
