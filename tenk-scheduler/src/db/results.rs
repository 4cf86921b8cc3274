//! Analysis record persistence and selection-support queries

use sqlx::{Row, SqlitePool};
use tenk_common::{Error, Result};
use uuid::Uuid;

use crate::models::{
    AnalysisOutput, AnalysisRecord, AnalysisStatus, Finding, Pitch, ProductMatch,
};

/// Insert or update an analysis record
pub async fn save_analysis(pool: &SqlitePool, record: &AnalysisRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO analyses (
            analysis_id, job_id, cik, company_name, status,
            accession_number, filing_date, catalog_fingerprint,
            findings_count, matches_count, top_fit_score,
            filing_from_cache, embeddings_from_cache,
            error_message, started_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(analysis_id) DO UPDATE SET
            status = excluded.status,
            accession_number = excluded.accession_number,
            filing_date = excluded.filing_date,
            catalog_fingerprint = excluded.catalog_fingerprint,
            findings_count = excluded.findings_count,
            matches_count = excluded.matches_count,
            top_fit_score = excluded.top_fit_score,
            filing_from_cache = excluded.filing_from_cache,
            embeddings_from_cache = excluded.embeddings_from_cache,
            error_message = excluded.error_message,
            completed_at = excluded.completed_at
        "#,
    )
    .bind(record.analysis_id.to_string())
    .bind(record.job_id.map(|id| id.to_string()))
    .bind(&record.cik)
    .bind(&record.company_name)
    .bind(record.status.as_str())
    .bind(&record.accession_number)
    .bind(&record.filing_date)
    .bind(&record.catalog_fingerprint)
    .bind(record.findings_count)
    .bind(record.matches_count)
    .bind(record.top_fit_score)
    .bind(record.filing_from_cache)
    .bind(record.embeddings_from_cache)
    .bind(&record.error_message)
    .bind(record.started_at.to_rfc3339())
    .bind(record.completed_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the pipeline output rows for a completed analysis
pub async fn save_output(
    pool: &SqlitePool,
    analysis_id: Uuid,
    output: &AnalysisOutput,
) -> Result<()> {
    let id = analysis_id.to_string();

    for finding in &output.findings {
        let quotes = serde_json::to_string(&finding.quotes)
            .map_err(|e| Error::Internal(format!("Failed to serialize quotes: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO findings (analysis_id, theme, rationale, confidence, quotes)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&finding.theme)
        .bind(&finding.rationale)
        .bind(finding.confidence)
        .bind(&quotes)
        .execute(pool)
        .await?;
    }

    for m in &output.matches {
        let evidence = serde_json::to_string(&m.evidence)
            .map_err(|e| Error::Internal(format!("Failed to serialize evidence: {}", e)))?;
        let objections = serde_json::to_string(&m.objections)
            .map_err(|e| Error::Internal(format!("Failed to serialize objections: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO product_matches (
                analysis_id, product_id, product_name, fit_score,
                why, evidence, objections, pain_theme
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&m.product_id)
        .bind(&m.product_name)
        .bind(m.fit_score)
        .bind(&m.why)
        .bind(&evidence)
        .bind(&objections)
        .bind(&m.pain_theme)
        .execute(pool)
        .await?;
    }

    for pitch in &output.pitches {
        let quotes = serde_json::to_string(&pitch.key_quotes)
            .map_err(|e| Error::Internal(format!("Failed to serialize key_quotes: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO pitches (analysis_id, persona, subject, body, key_quotes)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&pitch.persona)
        .bind(&pitch.subject)
        .bind(&pitch.body)
        .bind(&quotes)
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn analysis_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AnalysisRecord> {
    let analysis_id: String = row.get("analysis_id");
    let analysis_id = Uuid::parse_str(&analysis_id)
        .map_err(|e| Error::Internal(format!("Failed to parse analysis_id: {}", e)))?;

    let job_id: Option<String> = row.get("job_id");
    let job_id = job_id
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;

    let status: String = row.get("status");
    let status = AnalysisStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown analysis status: {}", status)))?;

    let started_at: String = row.get("started_at");

    Ok(AnalysisRecord {
        analysis_id,
        job_id,
        cik: row.get("cik"),
        company_name: row.get("company_name"),
        status,
        accession_number: row.get("accession_number"),
        filing_date: row.get("filing_date"),
        catalog_fingerprint: row.get("catalog_fingerprint"),
        findings_count: row.get("findings_count"),
        matches_count: row.get("matches_count"),
        top_fit_score: row.get("top_fit_score"),
        filing_from_cache: row.get("filing_from_cache"),
        embeddings_from_cache: row.get("embeddings_from_cache"),
        error_message: row.get("error_message"),
        started_at: super::parse_ts("started_at", &started_at)?,
        completed_at: super::parse_ts_opt("completed_at", row.get("completed_at"))?,
    })
}

const ANALYSIS_COLUMNS: &str = "analysis_id, job_id, cik, company_name, status, \
     accession_number, filing_date, catalog_fingerprint, \
     findings_count, matches_count, top_fit_score, \
     filing_from_cache, embeddings_from_cache, \
     error_message, started_at, completed_at";

/// Most recent completed analysis for a company, if any
pub async fn last_completed_analysis(
    pool: &SqlitePool,
    cik: &str,
) -> Result<Option<AnalysisRecord>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {} FROM analyses
        WHERE cik = ? AND status = 'completed'
        ORDER BY completed_at DESC
        LIMIT 1
        "#,
        ANALYSIS_COLUMNS
    ))
    .bind(cik)
    .fetch_optional(pool)
    .await?;

    row.map(|r| analysis_from_row(&r)).transpose()
}

/// Load one analysis record
pub async fn load_analysis(pool: &SqlitePool, analysis_id: Uuid) -> Result<Option<AnalysisRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM analyses WHERE analysis_id = ?",
        ANALYSIS_COLUMNS
    ))
    .bind(analysis_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| analysis_from_row(&r)).transpose()
}

/// Load the stored findings for an analysis
pub async fn findings_for_analysis(pool: &SqlitePool, analysis_id: Uuid) -> Result<Vec<Finding>> {
    let rows = sqlx::query(
        "SELECT theme, rationale, confidence, quotes FROM findings WHERE analysis_id = ? ORDER BY id",
    )
    .bind(analysis_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let quotes: String = row.get("quotes");
            Ok(Finding {
                theme: row.get("theme"),
                rationale: row.get("rationale"),
                confidence: row.get("confidence"),
                quotes: serde_json::from_str(&quotes)
                    .map_err(|e| Error::Internal(format!("Failed to deserialize quotes: {}", e)))?,
            })
        })
        .collect()
}

/// Load the stored product matches for an analysis
pub async fn matches_for_analysis(
    pool: &SqlitePool,
    analysis_id: Uuid,
) -> Result<Vec<ProductMatch>> {
    let rows = sqlx::query(
        r#"
        SELECT product_id, product_name, fit_score, why, evidence, objections, pain_theme
        FROM product_matches
        WHERE analysis_id = ?
        ORDER BY fit_score DESC
        "#,
    )
    .bind(analysis_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let evidence: String = row.get("evidence");
            let objections: String = row.get("objections");
            Ok(ProductMatch {
                product_id: row.get("product_id"),
                product_name: row.get("product_name"),
                fit_score: row.get("fit_score"),
                why: row.get("why"),
                evidence: serde_json::from_str(&evidence).map_err(|e| {
                    Error::Internal(format!("Failed to deserialize evidence: {}", e))
                })?,
                objections: serde_json::from_str(&objections).map_err(|e| {
                    Error::Internal(format!("Failed to deserialize objections: {}", e))
                })?,
                pain_theme: row.get("pain_theme"),
            })
        })
        .collect()
}

/// Aggregated outcome history for one company, recomputed from all completed
/// analyses during the priority refresh
#[derive(Debug, Clone)]
pub struct OutcomeStats {
    pub cik: String,
    pub company_name: String,
    pub times_analyzed: i64,
    pub last_analyzed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub total_findings: i64,
    pub avg_fit_score: Option<f64>,
    pub max_fit_score: Option<f64>,
}

/// Per-company aggregates over all completed analyses
pub async fn outcome_stats(pool: &SqlitePool) -> Result<Vec<OutcomeStats>> {
    let rows = sqlx::query(
        r#"
        SELECT cik,
               MAX(company_name) AS company_name,
               COUNT(*) AS times_analyzed,
               MAX(completed_at) AS last_analyzed_at,
               SUM(findings_count) AS total_findings,
               AVG(top_fit_score) AS avg_fit_score,
               MAX(top_fit_score) AS max_fit_score
        FROM analyses
        WHERE status = 'completed'
        GROUP BY cik
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(OutcomeStats {
                cik: row.get("cik"),
                company_name: row.get("company_name"),
                times_analyzed: row.get("times_analyzed"),
                last_analyzed_at: super::parse_ts_opt(
                    "last_analyzed_at",
                    row.get("last_analyzed_at"),
                )?,
                total_findings: row.get("total_findings"),
                avg_fit_score: row.get("avg_fit_score"),
                max_fit_score: row.get("max_fit_score"),
            })
        })
        .collect()
}

/// Load the stored pitches for an analysis
pub async fn pitches_for_analysis(pool: &SqlitePool, analysis_id: Uuid) -> Result<Vec<Pitch>> {
    let rows = sqlx::query(
        "SELECT persona, subject, body, key_quotes FROM pitches WHERE analysis_id = ? ORDER BY id",
    )
    .bind(analysis_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let quotes: String = row.get("key_quotes");
            Ok(Pitch {
                persona: row.get("persona"),
                subject: row.get("subject"),
                body: row.get("body"),
                key_quotes: serde_json::from_str(&quotes).map_err(|e| {
                    Error::Internal(format!("Failed to deserialize key_quotes: {}", e))
                })?,
            })
        })
        .collect()
}
