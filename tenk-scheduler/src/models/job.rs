//! Batch job and per-company analysis result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::company::Candidate;

/// Batch job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A batch of companies being processed through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: Uuid,
    pub run_id: Option<Uuid>,
    pub status: JobStatus,
    pub companies: Vec<Candidate>,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub skipped: i64,
    /// Company currently in flight (informational, for progress events)
    pub current_company: Option<String>,
    pub current_step: Option<String>,
    /// Rolling average seconds per finished company
    pub avg_seconds_per_company: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(run_id: Option<Uuid>, companies: Vec<Candidate>) -> Self {
        let total = companies.len() as i64;
        Self {
            job_id: Uuid::new_v4(),
            run_id,
            status: JobStatus::Queued,
            companies,
            total,
            completed: 0,
            failed: 0,
            skipped: 0,
            current_company: None,
            current_step: None,
            avg_seconds_per_company: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Number of companies that reached a terminal per-company outcome
    pub fn finished(&self) -> i64 {
        self.completed + self.failed + self.skipped
    }

    /// Record one finished company: fold its duration into the rolling
    /// average used for ETA estimates, then bump the matching counter. The
    /// average must fold before the counter moves, otherwise earlier
    /// companies get double-weighted.
    pub fn record_outcome(&mut self, status: AnalysisStatus, elapsed_seconds: f64) {
        let prior = self.finished() as f64;
        self.avg_seconds_per_company = Some(match self.avg_seconds_per_company {
            Some(avg) if prior > 0.0 => (avg * prior + elapsed_seconds) / (prior + 1.0),
            _ => elapsed_seconds,
        });
        match status {
            AnalysisStatus::Completed => self.completed += 1,
            AnalysisStatus::Skipped => self.skipped += 1,
            AnalysisStatus::Failed | AnalysisStatus::InProgress => self.failed += 1,
        }
    }

    /// Estimated seconds remaining, if enough history exists
    pub fn eta_seconds(&self) -> Option<f64> {
        let remaining = (self.total - self.finished()) as f64;
        self.avg_seconds_per_company
            .map(|avg| avg * remaining)
            .filter(|eta| *eta >= 0.0)
    }
}

/// Terminal outcome of one company within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::InProgress => "in_progress",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
            AnalysisStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(AnalysisStatus::InProgress),
            "completed" => Some(AnalysisStatus::Completed),
            "failed" => Some(AnalysisStatus::Failed),
            "skipped" => Some(AnalysisStatus::Skipped),
            _ => None,
        }
    }
}

/// A pain point or strategic priority extracted from a filing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub theme: String,
    pub rationale: String,
    /// Extraction confidence in [0, 1]
    pub confidence: f32,
    /// Supporting quotes lifted from the filing text
    pub quotes: Vec<String>,
}

/// A catalog product matched against an extracted finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMatch {
    pub product_id: String,
    pub product_name: String,
    /// Fit score in [0, 100]
    pub fit_score: f64,
    pub why: String,
    pub evidence: Vec<String>,
    pub objections: Vec<String>,
    /// Theme of the finding this match addresses
    pub pain_theme: String,
}

/// A synthesized outreach pitch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pitch {
    pub persona: String,
    pub subject: String,
    pub body: String,
    pub key_quotes: Vec<String>,
}

/// Everything the pipeline produced for one company
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub findings: Vec<Finding>,
    pub matches: Vec<ProductMatch>,
    pub pitches: Vec<Pitch>,
    /// Referee iterations consumed (1 = accepted first pass)
    pub referee_iterations: u32,
}

/// Durable record of one company analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub analysis_id: Uuid,
    pub job_id: Option<Uuid>,
    pub cik: String,
    pub company_name: String,
    pub status: AnalysisStatus,
    /// Accession number of the analyzed filing
    pub accession_number: Option<String>,
    pub filing_date: Option<String>,
    /// Catalog fingerprint active when this analysis ran
    pub catalog_fingerprint: Option<String>,
    pub findings_count: i64,
    pub matches_count: i64,
    pub top_fit_score: Option<f64>,
    /// The filing was served from the local cache
    pub filing_from_cache: bool,
    /// Chunk embeddings were reused from a prior collection
    pub embeddings_from_cache: bool,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    pub fn start(job_id: Option<Uuid>, candidate: &Candidate) -> Self {
        Self {
            analysis_id: Uuid::new_v4(),
            job_id,
            cik: candidate.cik.clone(),
            company_name: candidate.name.clone(),
            status: AnalysisStatus::InProgress,
            accession_number: None,
            filing_date: None,
            catalog_fingerprint: None,
            findings_count: 0,
            matches_count: 0,
            top_fit_score: None,
            filing_from_cache: false,
            embeddings_from_cache: false,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SizeTier;

    fn candidate() -> Candidate {
        Candidate {
            cik: "0000320193".to_string(),
            name: "Apple Inc.".to_string(),
            ticker: Some("AAPL".to_string()),
            tier: SizeTier::Mega,
        }
    }

    #[test]
    fn test_job_progress_rolling_average() {
        let mut job = BatchJob::new(None, vec![candidate(); 4]);

        job.record_outcome(AnalysisStatus::Completed, 10.0);
        assert_eq!(job.avg_seconds_per_company, Some(10.0));

        // 10s and 20s must average to 15s, not double-weight the first
        job.record_outcome(AnalysisStatus::Skipped, 20.0);
        assert_eq!(job.avg_seconds_per_company, Some(15.0));
        assert_eq!(job.completed, 1);
        assert_eq!(job.skipped, 1);

        // Two remaining at 15s average
        assert_eq!(job.eta_seconds(), Some(30.0));
    }

    #[test]
    fn test_job_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_analysis_record_starts_in_progress() {
        let record = AnalysisRecord::start(None, &candidate());
        assert_eq!(record.status, AnalysisStatus::InProgress);
        assert_eq!(record.cik, "0000320193");
        assert!(record.completed_at.is_none());
    }
}
