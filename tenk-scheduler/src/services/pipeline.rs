//! Batch pipeline execution engine
//!
//! Processes a shortlist sequentially; each company runs through
//! fetch, prepare, extract, match, score, synthesize, a bounded
//! validate/revise loop, and persist. One company's failure never aborts its
//! siblings.

use chrono::Utc;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tenk_common::config::{RefereeConfig, ReasoningConfig};
use tenk_common::events::{EngineEvent, EventBus};
use tenk_common::{Error, Result};
use uuid::Uuid;

use super::catalog::Catalog;
use super::filing_source::FilingSource;
use super::steps::{self, StageRunner};
use super::vector_store::VectorStore;
use crate::db;
use crate::models::{
    AnalysisOutput, AnalysisRecord, AnalysisStatus, BatchJob, Candidate, JobStatus,
};
use crate::providers::{EmbeddingGateway, ReasoningGateway};

const SEARCH_QUERY: &str =
    "business risks, operational challenges, strategic priorities, and planned investments";
const SEARCH_TOP_K: usize = 8;

struct Inner {
    pool: SqlitePool,
    filing_source: Arc<dyn FilingSource>,
    embeddings: Arc<EmbeddingGateway>,
    stages: StageRunner,
    vector_store: VectorStore,
    catalog_path: PathBuf,
    referee: RefereeConfig,
    events: EventBus,
}

#[derive(Clone)]
pub struct PipelineEngine {
    inner: Arc<Inner>,
}

impl PipelineEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        filing_source: Arc<dyn FilingSource>,
        reasoning: Arc<ReasoningGateway>,
        embeddings: Arc<EmbeddingGateway>,
        reasoning_config: &ReasoningConfig,
        vector_store: VectorStore,
        catalog_path: PathBuf,
        referee: RefereeConfig,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                filing_source,
                embeddings,
                stages: StageRunner::new(reasoning, reasoning_config),
                vector_store,
                catalog_path,
                referee,
                events,
            }),
        }
    }

    /// Create a queued job for the shortlist, persist it, and spawn its
    /// background execution. Returns the job id immediately; callers observe
    /// progress through the persisted job row and the event bus.
    pub async fn start_job(
        &self,
        run_id: Option<Uuid>,
        companies: Vec<Candidate>,
        force: bool,
    ) -> Result<Uuid> {
        let job = BatchJob::new(run_id, companies);
        let job_id = job.job_id;
        db::jobs::save_job(&self.inner.pool, &job).await?;

        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute(job, force).await;
        });

        Ok(job_id)
    }

    async fn execute(&self, mut job: BatchJob, force: bool) {
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        if let Err(e) = db::jobs::save_job(&self.inner.pool, &job).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to persist job start");
            return;
        }

        // Catalog is loaded once per job so every company in the batch sees
        // the same fingerprint
        let catalog = match Catalog::load(&self.inner.catalog_path) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Catalog load failed");
                job.status = JobStatus::Failed;
                job.error_message = Some(format!("Catalog load failed: {}", e));
                job.completed_at = Some(Utc::now());
                self.save_quietly(&job).await;
                return;
            }
        };

        let companies = job.companies.clone();
        for candidate in &companies {
            let started = Instant::now();
            job.current_company = Some(candidate.name.clone());
            job.current_step = Some("fetch".to_string());
            self.save_quietly(&job).await;
            self.emit_progress(&job);

            let status = self
                .process_company(&mut job, &catalog, candidate, force)
                .await;

            job.record_outcome(status, started.elapsed().as_secs_f64());
            self.save_quietly(&job).await;

            self.inner.events.emit_lossy(EngineEvent::CompanyFinished {
                job_id: job.job_id,
                cik: candidate.cik.clone(),
                outcome: status.as_str().to_string(),
                timestamp: Utc::now(),
            });
            self.emit_progress(&job);
        }

        job.status = JobStatus::Completed;
        job.current_company = None;
        job.current_step = None;
        job.completed_at = Some(Utc::now());
        self.save_quietly(&job).await;
        self.emit_progress(&job);

        tracing::info!(
            job_id = %job.job_id,
            completed = job.completed,
            skipped = job.skipped,
            failed = job.failed,
            "Batch job finished"
        );
    }

    /// Run one company through the pipeline. Never returns an error; every
    /// failure path collapses into a persisted terminal status.
    async fn process_company(
        &self,
        job: &mut BatchJob,
        catalog: &Catalog,
        candidate: &Candidate,
        force: bool,
    ) -> AnalysisStatus {
        // Freshness check: unchanged catalog plus a prior completed result
        // with at least one finding means no re-work. Force bypasses this
        // unconditionally.
        if !force {
            match self.should_skip(catalog, candidate).await {
                Ok(true) => {
                    tracing::info!(cik = %candidate.cik, "Skipping: catalog unchanged since last completed analysis");
                    let mut record = AnalysisRecord::start(Some(job.job_id), candidate);
                    record.status = AnalysisStatus::Skipped;
                    record.catalog_fingerprint = Some(catalog.fingerprint().to_string());
                    record.completed_at = Some(Utc::now());
                    if let Err(e) = db::results::save_analysis(&self.inner.pool, &record).await {
                        tracing::error!(cik = %candidate.cik, error = %e, "Failed to persist skip record");
                    }
                    return AnalysisStatus::Skipped;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(cik = %candidate.cik, error = %e, "Skip check failed, analyzing anyway");
                }
            }
        }

        let mut record = AnalysisRecord::start(Some(job.job_id), candidate);
        record.catalog_fingerprint = Some(catalog.fingerprint().to_string());

        let outcome = self.analyze(job, catalog, candidate, &mut record).await;

        match outcome {
            Ok(output) => {
                let real_findings = output
                    .findings
                    .iter()
                    .filter(|f| !steps::is_placeholder_finding(f))
                    .count() as i64;
                record.findings_count = real_findings;
                record.matches_count = output.matches.len() as i64;
                record.top_fit_score = output
                    .matches
                    .iter()
                    .map(|m| m.fit_score)
                    .fold(None, |acc: Option<f64>, s| {
                        Some(acc.map_or(s, |a| a.max(s)))
                    });

                if real_findings > 0 {
                    record.status = AnalysisStatus::Completed;
                    if let Err(e) =
                        db::results::save_output(&self.inner.pool, record.analysis_id, &output)
                            .await
                    {
                        tracing::error!(cik = %candidate.cik, error = %e, "Failed to persist output rows");
                    }
                } else {
                    // Never completed with empty results
                    record.status = AnalysisStatus::Failed;
                    record.error_message =
                        Some("Pipeline produced zero findings".to_string());
                }
            }
            Err(e) => {
                tracing::warn!(cik = %candidate.cik, error = %e, "Company analysis failed");
                record.status = AnalysisStatus::Failed;
                record.error_message = Some(e.to_string());
            }
        }

        record.completed_at = Some(Utc::now());
        if let Err(e) = db::results::save_analysis(&self.inner.pool, &record).await {
            tracing::error!(cik = %candidate.cik, error = %e, "Failed to persist analysis record");
        }
        record.status
    }

    async fn should_skip(&self, catalog: &Catalog, candidate: &Candidate) -> Result<bool> {
        let prior = db::results::last_completed_analysis(&self.inner.pool, &candidate.cik).await?;
        Ok(matches!(
            prior,
            Some(record)
                if record.catalog_fingerprint.as_deref() == Some(catalog.fingerprint())
                    && record.findings_count > 0
        ))
    }

    async fn analyze(
        &self,
        job: &mut BatchJob,
        catalog: &Catalog,
        candidate: &Candidate,
        record: &mut AnalysisRecord,
    ) -> Result<AnalysisOutput> {
        let filing = self.inner.filing_source.latest_filing(candidate).await?;
        record.accession_number = Some(filing.accession_number.clone());
        record.filing_date = Some(filing.filing_date.clone());
        record.filing_from_cache = filing.from_cache;

        self.set_step(job, "prepare").await;
        let prepared = self
            .inner
            .vector_store
            .prepare(&filing, &self.inner.embeddings)
            .await?;
        record.embeddings_from_cache = prepared.from_cache;

        let snippets = prepared
            .search(SEARCH_QUERY, SEARCH_TOP_K, &self.inner.embeddings)
            .await?;
        if snippets.is_empty() {
            return Err(Error::Internal(format!(
                "No searchable content for {}",
                candidate.name
            )));
        }

        // Bounded validate/revise loop. The final iteration's output is
        // accepted even when checks still fail.
        let max_iterations = self.inner.referee.max_iterations.max(1);
        let mut feedback: Vec<String> = Vec::new();
        let mut output = AnalysisOutput::default();

        for iteration in 1..=max_iterations {
            self.set_step(job, "extract").await;
            let findings = self
                .inner
                .stages
                .extract_findings(&candidate.name, &snippets, &feedback)
                .await;

            self.set_step(job, "match").await;
            let matches = self
                .inner
                .stages
                .match_products(&candidate.name, &findings, catalog)
                .await;

            self.set_step(job, "score").await;
            let matches = self.inner.stages.score_matches(&candidate.name, matches).await;

            self.set_step(job, "synthesize").await;
            let pitches = self
                .inner
                .stages
                .synthesize_pitches(&candidate.name, &findings, &matches)
                .await;

            output = AnalysisOutput {
                findings,
                matches,
                pitches,
                referee_iterations: iteration,
            };

            self.set_step(job, "validate").await;
            let issues = steps::validate_output(&output, self.inner.referee.min_confidence);
            if issues.is_empty() {
                break;
            }
            if iteration == max_iterations {
                tracing::info!(
                    cik = %candidate.cik,
                    issues = issues.len(),
                    "Accepting imperfect output at referee iteration cap"
                );
                break;
            }
            tracing::debug!(cik = %candidate.cik, iteration, ?issues, "Referee requested revision");
            feedback.extend(issues);
        }

        self.set_step(job, "persist").await;
        Ok(output)
    }

    async fn set_step(&self, job: &mut BatchJob, step: &str) {
        job.current_step = Some(step.to_string());
        self.save_quietly(job).await;
    }

    async fn save_quietly(&self, job: &BatchJob) {
        if let Err(e) = db::jobs::save_job(&self.inner.pool, job).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to persist job progress");
        }
    }

    fn emit_progress(&self, job: &BatchJob) {
        self.inner.events.emit_lossy(EngineEvent::JobProgress {
            job_id: job.job_id,
            completed: job.completed,
            failed: job.failed,
            skipped: job.skipped,
            total: job.total,
            current_company: job.current_company.clone(),
            current_step: job.current_step.clone(),
            eta_seconds: job.eta_seconds(),
            timestamp: Utc::now(),
        });
    }
}
