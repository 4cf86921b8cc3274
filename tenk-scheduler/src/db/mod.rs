//! Database access for the tenk scheduling engine
//!
//! All state lives in one SQLite database under the data directory. Tables
//! are created idempotently at pool initialization.

pub mod decisions;
pub mod jobs;
pub mod priorities;
pub mod results;
pub mod runs;
pub mod state;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use tenk_common::{Error, Result};

/// Initialize the database connection pool and create tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create engine tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Singleton row: durable settings plus the single-flight job claim
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            settings TEXT NOT NULL,
            current_job_id TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_liveness (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            next_wake_at TEXT,
            last_wake_at TEXT,
            total_runs INTEGER NOT NULL DEFAULT 0,
            successful_runs INTEGER NOT NULL DEFAULT 0,
            failed_runs INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            triggered_by TEXT NOT NULL,
            trigger_time TEXT NOT NULL,
            status TEXT NOT NULL,
            companies_selected TEXT NOT NULL DEFAULT '[]',
            companies_analyzed INTEGER NOT NULL DEFAULT 0,
            companies_skipped INTEGER NOT NULL DEFAULT 0,
            companies_failed INTEGER NOT NULL DEFAULT 0,
            job_id TEXT,
            error_message TEXT,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS company_priorities (
            cik TEXT PRIMARY KEY,
            company_name TEXT NOT NULL,
            tier TEXT,
            priority_score REAL NOT NULL DEFAULT 0.0,
            last_analyzed_at TEXT,
            next_eligible_at TEXT,
            times_analyzed INTEGER NOT NULL DEFAULT 0,
            total_findings INTEGER NOT NULL DEFAULT 0,
            avg_fit_score REAL,
            has_high_value INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS decisions (
            decision_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            cik TEXT NOT NULL,
            company_name TEXT NOT NULL,
            action TEXT NOT NULL,
            reason TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL DEFAULT 0.0,
            priority_score REAL NOT NULL DEFAULT 0.0,
            snapshot TEXT NOT NULL DEFAULT '{}',
            decided_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_run ON decisions(run_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_jobs (
            job_id TEXT PRIMARY KEY,
            run_id TEXT,
            status TEXT NOT NULL,
            companies TEXT NOT NULL DEFAULT '[]',
            total INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            current_company TEXT,
            current_step TEXT,
            avg_seconds_per_company REAL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            analysis_id TEXT PRIMARY KEY,
            job_id TEXT,
            cik TEXT NOT NULL,
            company_name TEXT NOT NULL,
            status TEXT NOT NULL,
            accession_number TEXT,
            filing_date TEXT,
            catalog_fingerprint TEXT,
            findings_count INTEGER NOT NULL DEFAULT 0,
            matches_count INTEGER NOT NULL DEFAULT 0,
            top_fit_score REAL,
            filing_from_cache INTEGER NOT NULL DEFAULT 0,
            embeddings_from_cache INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analyses_cik ON analyses(cik, status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS findings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            analysis_id TEXT NOT NULL,
            theme TEXT NOT NULL,
            rationale TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL DEFAULT 0.0,
            quotes TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_findings_analysis ON findings(analysis_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            analysis_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            product_name TEXT NOT NULL,
            fit_score REAL NOT NULL DEFAULT 0.0,
            why TEXT NOT NULL DEFAULT '',
            evidence TEXT NOT NULL DEFAULT '[]',
            objections TEXT NOT NULL DEFAULT '[]',
            pain_theme TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_matches_analysis ON product_matches(analysis_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pitches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            analysis_id TEXT NOT NULL,
            persona TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            key_quotes TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}

/// Parse an RFC 3339 TEXT column into a UTC timestamp
pub(crate) fn parse_ts(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

/// Parse an optional RFC 3339 TEXT column
pub(crate) fn parse_ts_opt(field: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_ts(field, &s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenk.db");
        let pool = init_database_pool(&path).await.unwrap();
        // Second init against the same file must not fail
        init_tables(&pool).await.unwrap();
    }

    #[test]
    fn test_parse_ts_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts("t", &now.to_rfc3339()).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_ts("t", "not-a-date").is_err());
        assert_eq!(parse_ts_opt("t", None).unwrap(), None);
    }
}
