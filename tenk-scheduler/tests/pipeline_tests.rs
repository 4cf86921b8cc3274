//! Batch pipeline integration tests
//!
//! Run against a real temp-file SQLite database with stubbed filing source
//! and scripted providers; no network, no real models.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tenk_common::config::{ChunkingConfig, ReasoningConfig, RefereeConfig};
use tenk_common::events::EventBus;
use tenk_common::Result;
use uuid::Uuid;

use tenk_scheduler::db;
use tenk_scheduler::models::{AnalysisStatus, BatchJob, Candidate, JobStatus, SizeTier};
use tenk_scheduler::providers::{
    CompletionRequest, EmbeddingGateway, EmbeddingProvider, HashEmbedder, ReasoningGateway,
    ReasoningProvider,
};
use tenk_scheduler::services::{Filing, FilingSource, PipelineEngine, VectorStore};

/// Filing source that writes a synthetic filing into a temp dir
struct StubFilingSource {
    dir: TempDir,
    fetches: AtomicUsize,
}

impl StubFilingSource {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FilingSource for StubFilingSource {
    async fn latest_filing(&self, candidate: &Candidate) -> Result<Filing> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.path().join(format!("{}.txt", candidate.cik));
        let text = "supply chain concentration risks dominate the annual report. \
                    logistics costs rose sharply and sole-source suppliers remain a concern."
            .to_string();
        std::fs::write(&path, &text).unwrap();
        Ok(Filing {
            cik: candidate.cik.clone(),
            accession_number: "acc-0001".to_string(),
            filing_date: "2024-06-30".to_string(),
            text,
            path,
            from_cache: false,
        })
    }
}

/// Reasoning provider that returns canned JSON per stage, keyed off the
/// system prompt. `good_pitch` controls whether synthesized pitches carry
/// citations, which decides referee acceptance.
struct ScriptedProvider {
    good_pitch: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = if request.system.contains("SEC annual filings") {
            r#"[{"theme":"supply chain","rationale":"sole-source exposure","confidence":0.9,"quotes":["sole-source suppliers remain a concern"]}]"#
        } else if request.system.contains("pain points to products") {
            r#"[{"product_id":"p-1","product_name":"Resilience Suite","why":"addresses supplier risk","evidence":["sole-source suppliers remain a concern"],"objections":[],"pain_theme":"supply chain"}]"#
        } else if request.system.contains("score product-fit") {
            r#"[{"product_id":"p-1","fit_score":85}]"#
        } else if self.good_pitch {
            r#"[{"persona":"VP Supply Chain","subject":"Supplier risk","body":"Your 10-K notes sole-source exposure","key_quotes":["sole-source suppliers remain a concern"]}]"#
        } else {
            r#"[{"persona":"VP Supply Chain","subject":"Supplier risk","body":"Generic outreach","key_quotes":[]}]"#
        };
        Ok(response.to_string())
    }
}

/// Always-failing provider for placeholder-path tests
struct DeadProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl ReasoningProvider for DeadProvider {
    fn name(&self) -> &str {
        "dead"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(tenk_common::Error::Provider("model offline".to_string()))
    }
}

/// Embedder wrapper that counts calls
struct CountingEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn name(&self) -> &str {
        "counting"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(texts).await
    }
}

fn candidate() -> Candidate {
    Candidate {
        cik: "0000000042".to_string(),
        name: "Widget Corp".to_string(),
        ticker: Some("WDGT".to_string()),
        tier: SizeTier::Small,
    }
}

fn write_catalog(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("products.json");
    std::fs::write(
        &path,
        r#"[{"id":"p-1","name":"Resilience Suite","description":"supplier risk management","themes":["supply chain"]}]"#,
    )
    .unwrap();
    path
}

struct Harness {
    _data_dir: TempDir,
    pool: sqlx::SqlitePool,
    engine: PipelineEngine,
    embedder: Arc<CountingEmbedder>,
    source: Arc<StubFilingSource>,
}

async fn harness(provider: Arc<dyn ReasoningProvider>, max_iterations: u32) -> Harness {
    let data_dir = tempfile::tempdir().unwrap();
    let pool = db::init_database_pool(&data_dir.path().join("tenk.db"))
        .await
        .unwrap();
    let catalog_path = write_catalog(data_dir.path());

    let mut reasoning = ReasoningGateway::new();
    reasoning.push(provider, 600_000);

    let embedder = Arc::new(CountingEmbedder {
        inner: HashEmbedder::new(64),
        calls: AtomicUsize::new(0),
    });
    let mut embeddings = EmbeddingGateway::new();
    embeddings.push(embedder.clone(), 600_000);

    let source = Arc::new(StubFilingSource::new());

    let engine = PipelineEngine::new(
        pool.clone(),
        source.clone(),
        Arc::new(reasoning),
        Arc::new(embeddings),
        &ReasoningConfig::default(),
        VectorStore::new(
            data_dir.path().join("vectors"),
            ChunkingConfig {
                chunk_size: 80,
                chunk_overlap: 10,
            },
        ),
        catalog_path,
        RefereeConfig {
            max_iterations,
            min_confidence: 0.6,
        },
        EventBus::new(16),
    );

    Harness {
        _data_dir: data_dir,
        pool,
        engine,
        embedder,
        source,
    }
}

async fn wait_for_job(pool: &sqlx::SqlitePool, job_id: Uuid) -> BatchJob {
    for _ in 0..500 {
        if let Some(job) = db::jobs::load_job(pool, job_id).await.unwrap() {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

/// Happy path: one company, referee accepts on the first iteration
#[tokio::test]
async fn test_single_company_completes() {
    let provider = Arc::new(ScriptedProvider {
        good_pitch: true,
        calls: AtomicUsize::new(0),
    });
    let h = harness(provider, 3).await;

    let job_id = h
        .engine
        .start_job(None, vec![candidate()], false)
        .await
        .unwrap();
    let job = wait_for_job(&h.pool, job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed, 1);
    assert_eq!(job.failed, 0);
    assert_eq!(job.skipped, 0);

    let record = db::results::last_completed_analysis(&h.pool, "0000000042")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, AnalysisStatus::Completed);
    assert_eq!(record.findings_count, 1);
    assert_eq!(record.top_fit_score, Some(85.0));
    assert_eq!(record.accession_number.as_deref(), Some("acc-0001"));

    let findings = db::results::findings_for_analysis(&h.pool, record.analysis_id)
        .await
        .unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].theme, "supply chain");
}

/// Referee loop is bounded: validation fails every iteration, the output is
/// accepted at the cap after exactly max_iterations attempts
#[tokio::test]
async fn test_referee_accepts_at_iteration_cap() {
    let max_iterations = 3;
    let provider = Arc::new(ScriptedProvider {
        good_pitch: false, // pitch never cites evidence, validation always fails
        calls: AtomicUsize::new(0),
    });
    let provider_for_count = provider.clone();
    let h = harness(provider, max_iterations).await;

    let job_id = h
        .engine
        .start_job(None, vec![candidate()], false)
        .await
        .unwrap();
    let job = wait_for_job(&h.pool, job_id).await;

    // Accepted despite outstanding issues: findings are real, so completed
    assert_eq!(job.completed, 1);
    let record = db::results::last_completed_analysis(&h.pool, "0000000042")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, AnalysisStatus::Completed);

    // Exactly max_iterations attempts, four reasoning calls each
    assert_eq!(
        provider_for_count.calls.load(Ordering::SeqCst),
        (max_iterations as usize) * 4
    );
}

/// Completion invariant: a pipeline run that yields only placeholder
/// findings is failed, never completed with empty results
#[tokio::test]
async fn test_zero_findings_is_failed() {
    let provider = Arc::new(DeadProvider {
        calls: AtomicUsize::new(0),
    });
    let provider_for_count = provider.clone();
    let h = harness(provider, 2).await;

    let job_id = h
        .engine
        .start_job(None, vec![candidate()], false)
        .await
        .unwrap();
    let job = wait_for_job(&h.pool, job_id).await;

    assert_eq!(job.failed, 1);
    assert_eq!(job.completed, 0);
    assert!(db::results::last_completed_analysis(&h.pool, "0000000042")
        .await
        .unwrap()
        .is_none());

    // Bounded even on the all-placeholder path
    assert_eq!(provider_for_count.calls.load(Ordering::SeqCst), 2 * 4);
}

/// Freshness gate: unchanged catalog fingerprint plus a prior completed
/// result with findings short-circuits the company with zero provider calls
#[tokio::test]
async fn test_catalog_fingerprint_skip() {
    let provider = Arc::new(ScriptedProvider {
        good_pitch: true,
        calls: AtomicUsize::new(0),
    });
    let provider_for_count = provider.clone();
    let h = harness(provider, 3).await;

    // First pass analyzes for real
    let job_id = h
        .engine
        .start_job(None, vec![candidate()], false)
        .await
        .unwrap();
    let first = wait_for_job(&h.pool, job_id).await;
    assert_eq!(first.completed, 1);

    let calls_after_first = provider_for_count.calls.load(Ordering::SeqCst);
    let embeds_after_first = h.embedder.calls.load(Ordering::SeqCst);
    let fetches_after_first = h.source.fetches.load(Ordering::SeqCst);

    // Second pass with the same catalog: skipped, no provider or fetch calls
    let job_id = h
        .engine
        .start_job(None, vec![candidate()], false)
        .await
        .unwrap();
    let second = wait_for_job(&h.pool, job_id).await;

    assert_eq!(second.skipped, 1);
    assert_eq!(second.completed, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(provider_for_count.calls.load(Ordering::SeqCst), calls_after_first);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embeds_after_first);
    assert_eq!(h.source.fetches.load(Ordering::SeqCst), fetches_after_first);
}

/// Force-reanalysis bypasses the freshness gate unconditionally
#[tokio::test]
async fn test_force_bypasses_skip() {
    let provider = Arc::new(ScriptedProvider {
        good_pitch: true,
        calls: AtomicUsize::new(0),
    });
    let h = harness(provider, 3).await;

    let job_id = h
        .engine
        .start_job(None, vec![candidate()], false)
        .await
        .unwrap();
    wait_for_job(&h.pool, job_id).await;

    let job_id = h
        .engine
        .start_job(None, vec![candidate()], true)
        .await
        .unwrap();
    let second = wait_for_job(&h.pool, job_id).await;

    assert_eq!(second.completed, 1);
    assert_eq!(second.skipped, 0);
}

/// Per-company isolation: a failing company never aborts its siblings
#[tokio::test]
async fn test_company_failure_is_isolated() {
    struct HalfBrokenSource {
        inner: StubFilingSource,
    }

    #[async_trait]
    impl FilingSource for HalfBrokenSource {
        async fn latest_filing(&self, candidate: &Candidate) -> Result<Filing> {
            if candidate.cik == "0000000013" {
                return Err(tenk_common::Error::Provider("fetch exploded".to_string()));
            }
            self.inner.latest_filing(candidate).await
        }
    }

    let data_dir = tempfile::tempdir().unwrap();
    let pool = db::init_database_pool(&data_dir.path().join("tenk.db"))
        .await
        .unwrap();
    let catalog_path = write_catalog(data_dir.path());

    let mut reasoning = ReasoningGateway::new();
    reasoning.push(
        Arc::new(ScriptedProvider {
            good_pitch: true,
            calls: AtomicUsize::new(0),
        }),
        600_000,
    );
    let mut embeddings = EmbeddingGateway::new();
    embeddings.push(Arc::new(HashEmbedder::new(64)), 600_000);

    let engine = PipelineEngine::new(
        pool.clone(),
        Arc::new(HalfBrokenSource {
            inner: StubFilingSource::new(),
        }),
        Arc::new(reasoning),
        Arc::new(embeddings),
        &ReasoningConfig::default(),
        VectorStore::new(
            data_dir.path().join("vectors"),
            ChunkingConfig {
                chunk_size: 80,
                chunk_overlap: 10,
            },
        ),
        catalog_path,
        RefereeConfig::default(),
        EventBus::new(16),
    );

    let unlucky = Candidate {
        cik: "0000000013".to_string(),
        name: "Broken Co".to_string(),
        ticker: None,
        tier: SizeTier::Small,
    };
    let job_id = engine
        .start_job(None, vec![unlucky, candidate()], false)
        .await
        .unwrap();
    let job = wait_for_job(&pool, job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.failed, 1);
    assert_eq!(job.completed, 1);

    // The failure is recorded with its error text
    let record = db::results::last_completed_analysis(&pool, "0000000042")
        .await
        .unwrap();
    assert!(record.is_some());
}
