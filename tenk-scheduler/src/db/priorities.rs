//! Per-company priority statistics

use sqlx::{Row, SqlitePool};
use tenk_common::Result;

use crate::models::{PriorityRecord, SizeTier};

/// Insert or update a company's priority record
pub async fn upsert_priority(pool: &SqlitePool, record: &PriorityRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO company_priorities (
            cik, company_name, tier, priority_score, last_analyzed_at, next_eligible_at,
            times_analyzed, total_findings, avg_fit_score, has_high_value, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(cik) DO UPDATE SET
            company_name = excluded.company_name,
            tier = COALESCE(excluded.tier, tier),
            priority_score = excluded.priority_score,
            last_analyzed_at = excluded.last_analyzed_at,
            next_eligible_at = excluded.next_eligible_at,
            times_analyzed = excluded.times_analyzed,
            total_findings = excluded.total_findings,
            avg_fit_score = excluded.avg_fit_score,
            has_high_value = excluded.has_high_value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.cik)
    .bind(&record.company_name)
    .bind(record.tier.map(|t| t.as_str()))
    .bind(record.priority_score)
    .bind(record.last_analyzed_at.map(|dt| dt.to_rfc3339()))
    .bind(record.next_eligible_at.map(|dt| dt.to_rfc3339()))
    .bind(record.times_analyzed)
    .bind(record.total_findings)
    .bind(record.avg_fit_score)
    .bind(record.has_high_value)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PriorityRecord> {
    let tier: Option<String> = row.get("tier");

    Ok(PriorityRecord {
        cik: row.get("cik"),
        company_name: row.get("company_name"),
        tier: tier.as_deref().and_then(SizeTier::parse),
        priority_score: row.get("priority_score"),
        last_analyzed_at: super::parse_ts_opt("last_analyzed_at", row.get("last_analyzed_at"))?,
        next_eligible_at: super::parse_ts_opt("next_eligible_at", row.get("next_eligible_at"))?,
        times_analyzed: row.get("times_analyzed"),
        total_findings: row.get("total_findings"),
        avg_fit_score: row.get("avg_fit_score"),
        has_high_value: row.get("has_high_value"),
        updated_at: super::parse_ts_opt("updated_at", row.get("updated_at"))?,
    })
}

const PRIORITY_COLUMNS: &str = "cik, company_name, tier, priority_score, last_analyzed_at, \
     next_eligible_at, times_analyzed, total_findings, avg_fit_score, has_high_value, updated_at";

/// Load one company's priority record
pub async fn load_priority(pool: &SqlitePool, cik: &str) -> Result<Option<PriorityRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM company_priorities WHERE cik = ?",
        PRIORITY_COLUMNS
    ))
    .bind(cik)
    .fetch_optional(pool)
    .await?;

    row.map(|r| record_from_row(&r)).transpose()
}

/// All priority records, highest score first
pub async fn all_priorities(pool: &SqlitePool) -> Result<Vec<PriorityRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM company_priorities ORDER BY priority_score DESC",
        PRIORITY_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;

    #[tokio::test]
    async fn test_priority_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("tenk.db")).await.unwrap();

        let record = PriorityRecord {
            cik: "0000320193".to_string(),
            company_name: "Apple Inc.".to_string(),
            tier: Some(SizeTier::Mega),
            priority_score: 85.0,
            last_analyzed_at: Some(chrono::Utc::now()),
            next_eligible_at: Some(chrono::Utc::now() + chrono::Duration::days(90)),
            times_analyzed: 2,
            total_findings: 12,
            avg_fit_score: Some(80.0),
            has_high_value: true,
            updated_at: None,
        };
        upsert_priority(&pool, &record).await.unwrap();

        let loaded = load_priority(&pool, "0000320193").await.unwrap().unwrap();
        assert_eq!(loaded.tier, Some(SizeTier::Mega));
        assert_eq!(loaded.priority_score, 85.0);
        assert_eq!(loaded.times_analyzed, 2);
        assert!(loaded.has_high_value);
        assert!(loaded.next_eligible_at.is_some());
    }

    #[tokio::test]
    async fn test_upsert_keeps_known_tier() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("tenk.db")).await.unwrap();

        let mut record = PriorityRecord {
            cik: "0001318605".to_string(),
            company_name: "Tesla, Inc.".to_string(),
            tier: Some(SizeTier::Large),
            priority_score: 50.0,
            ..Default::default()
        };
        upsert_priority(&pool, &record).await.unwrap();

        // A refresh that doesn't know the tier must not erase it
        record.tier = None;
        record.priority_score = 60.0;
        upsert_priority(&pool, &record).await.unwrap();

        let loaded = load_priority(&pool, "0001318605").await.unwrap().unwrap();
        assert_eq!(loaded.tier, Some(SizeTier::Large));
        assert_eq!(loaded.priority_score, 60.0);
    }

    #[tokio::test]
    async fn test_all_priorities_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("tenk.db")).await.unwrap();

        for (cik, score) in [("0000000001", 40.0), ("0000000002", 90.0)] {
            upsert_priority(
                &pool,
                &PriorityRecord {
                    cik: cik.to_string(),
                    company_name: cik.to_string(),
                    priority_score: score,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let all = all_priorities(&pool).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].cik, "0000000002");
    }
}
