//! Auditable selection decision log

use sqlx::{Row, SqlitePool};
use tenk_common::{Error, Result};
use uuid::Uuid;

use crate::models::{Decision, DecisionAction, ReasonCode};

/// Append one decision to the audit log
pub async fn insert_decision(pool: &SqlitePool, decision: &Decision) -> Result<()> {
    let snapshot = serde_json::to_string(&decision.snapshot)
        .map_err(|e| Error::Internal(format!("Failed to serialize snapshot: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO decisions (
            decision_id, run_id, cik, company_name, action,
            reason, detail, confidence, priority_score, snapshot, decided_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(decision.decision_id.to_string())
    .bind(decision.run_id.to_string())
    .bind(&decision.cik)
    .bind(&decision.company_name)
    .bind(decision.action.as_str())
    .bind(decision.reason.as_str())
    .bind(&decision.detail)
    .bind(decision.confidence)
    .bind(decision.priority_score)
    .bind(&snapshot)
    .bind(decision.decided_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

fn decision_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Decision> {
    let decision_id: String = row.get("decision_id");
    let run_id: String = row.get("run_id");
    let action: String = row.get("action");
    let reason: String = row.get("reason");
    let decided_at: String = row.get("decided_at");
    let snapshot: String = row.get("snapshot");

    Ok(Decision {
        decision_id: Uuid::parse_str(&decision_id)
            .map_err(|e| Error::Internal(format!("Failed to parse decision_id: {}", e)))?,
        run_id: Uuid::parse_str(&run_id)
            .map_err(|e| Error::Internal(format!("Failed to parse run_id: {}", e)))?,
        cik: row.get("cik"),
        company_name: row.get("company_name"),
        action: DecisionAction::parse(&action)
            .ok_or_else(|| Error::Internal(format!("Unknown decision action: {}", action)))?,
        reason: ReasonCode::parse(&reason)
            .ok_or_else(|| Error::Internal(format!("Unknown reason code: {}", reason)))?,
        detail: row.get("detail"),
        confidence: row.get("confidence"),
        priority_score: row.get("priority_score"),
        snapshot: serde_json::from_str(&snapshot)
            .map_err(|e| Error::Internal(format!("Failed to deserialize snapshot: {}", e)))?,
        decided_at: super::parse_ts("decided_at", &decided_at)?,
    })
}

/// All decisions recorded for one run, in decision order
pub async fn decisions_for_run(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<Decision>> {
    let rows = sqlx::query(
        r#"
        SELECT decision_id, run_id, cik, company_name, action,
               reason, detail, confidence, priority_score, snapshot, decided_at
        FROM decisions
        WHERE run_id = ?
        ORDER BY decided_at ASC, decision_id ASC
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(decision_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::models::{Candidate, CandidateContext, SizeTier};

    fn context(cik: &str, score: f64) -> CandidateContext {
        CandidateContext {
            candidate: Candidate {
                cik: cik.to_string(),
                name: "Test Co".to_string(),
                ticker: None,
                tier: SizeTier::Mid,
            },
            days_since_last: None,
            last_analyzed_at: None,
            times_analyzed: 0,
            total_findings: 0,
            avg_fit_score: None,
            has_high_value: false,
            priority_score: score,
            reason: ReasonCode::FirstTime,
        }
    }

    #[tokio::test]
    async fn test_decision_log_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("tenk.db")).await.unwrap();

        let run_id = Uuid::new_v4();
        let analyze = Decision::new(
            run_id,
            &context("0000000001", 75.0),
            DecisionAction::Analyze,
            "never analyzed before".to_string(),
            0.9,
        );
        let skip = Decision::new(
            run_id,
            &context("0000000002", 50.0),
            DecisionAction::Skip,
            "analyzed 3 days ago, interval is 90".to_string(),
            1.0,
        );
        insert_decision(&pool, &analyze).await.unwrap();
        insert_decision(&pool, &skip).await.unwrap();

        // Decisions for an unrelated run are excluded
        let other = Decision::new(
            Uuid::new_v4(),
            &context("0000000003", 10.0),
            DecisionAction::Skip,
            "other run".to_string(),
            1.0,
        );
        insert_decision(&pool, &other).await.unwrap();

        let log = decisions_for_run(&pool, run_id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, DecisionAction::Analyze);
        assert_eq!(log[0].reason, ReasonCode::FirstTime);
        assert_eq!(log[0].confidence, 0.9);
        assert_eq!(log[0].snapshot.priority_score, 75.0);
        assert_eq!(log[1].action, DecisionAction::Skip);
        assert!(log[1].detail.contains("interval"));
    }
}
