//! Selection engine integration tests
//!
//! Drive refresh_priorities and build_shortlist against a real temp-file
//! database with a stubbed candidate feed, and assert on the shortlist and
//! the Decision audit trail.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tenk_common::config::ScoringWeights;
use tenk_common::Result;
use uuid::Uuid;

use tenk_scheduler::db;
use tenk_scheduler::models::{
    AnalysisRecord, AnalysisStatus, Candidate, DecisionAction, ReasonCode, SchedulerSettings,
    SizeTier,
};
use tenk_scheduler::providers::{CompletionRequest, ReasoningGateway, ReasoningProvider};
use tenk_scheduler::services::{CandidateFeed, SelectionEngine};

struct StubFeed {
    by_tier: HashMap<SizeTier, Vec<Candidate>>,
}

impl StubFeed {
    fn new(candidates: Vec<Candidate>) -> Self {
        let mut by_tier: HashMap<SizeTier, Vec<Candidate>> = HashMap::new();
        for c in candidates {
            by_tier.entry(c.tier).or_default().push(c);
        }
        Self { by_tier }
    }
}

#[async_trait]
impl CandidateFeed for StubFeed {
    async fn candidates(&self, tier: SizeTier, limit: usize) -> Result<Vec<Candidate>> {
        let mut list = self.by_tier.get(&tier).cloned().unwrap_or_default();
        list.truncate(limit);
        Ok(list)
    }
}

fn candidate(cik: &str, name: &str, tier: SizeTier) -> Candidate {
    Candidate {
        cik: cik.to_string(),
        name: name.to_string(),
        ticker: None,
        tier,
    }
}

async fn pool_in(dir: &TempDir) -> sqlx::SqlitePool {
    db::init_database_pool(&dir.path().join("tenk.db"))
        .await
        .unwrap()
}

/// Insert one completed analysis `days_ago` in the past
async fn record_analysis(
    pool: &sqlx::SqlitePool,
    c: &Candidate,
    days_ago: i64,
    findings: i64,
    fit: f64,
    fingerprint: &str,
) {
    let mut record = AnalysisRecord::start(None, c);
    record.status = AnalysisStatus::Completed;
    record.findings_count = findings;
    record.matches_count = 1;
    record.top_fit_score = Some(fit);
    record.catalog_fingerprint = Some(fingerprint.to_string());
    record.started_at = Utc::now() - Duration::days(days_ago);
    record.completed_at = Some(Utc::now() - Duration::days(days_ago));
    db::results::save_analysis(pool, &record).await.unwrap();
}

fn engine(pool: sqlx::SqlitePool, feed: StubFeed) -> SelectionEngine {
    SelectionEngine::new(
        pool,
        Arc::new(feed),
        Arc::new(ReasoningGateway::new()),
        ScoringWeights::default(),
    )
}

/// A company never analyzed before is selected with a first-time decision
#[tokio::test]
async fn test_first_time_company_selected() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let feed = StubFeed::new(vec![candidate("0000000001", "New Co", SizeTier::Small)]);
    let engine = engine(pool.clone(), feed);

    let run_id = Uuid::new_v4();
    let shortlist = engine
        .build_shortlist(run_id, &SchedulerSettings::default(), None)
        .await
        .unwrap();

    assert_eq!(shortlist.len(), 1);
    assert_eq!(shortlist[0].candidate.cik, "0000000001");
    assert_eq!(shortlist[0].reason, ReasonCode::FirstTime);
    assert_eq!(shortlist[0].times_analyzed, 0);

    let decisions = db::decisions::decisions_for_run(&pool, run_id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].action, DecisionAction::Analyze);
    assert_eq!(decisions[0].reason, ReasonCode::FirstTime);
    assert!(decisions[0].confidence > 0.0);
    assert_eq!(decisions[0].snapshot.times_analyzed, 0);
}

/// Freshness is a hard gate: analyzed 10 days ago with a 90-day interval
/// means excluded, however high the priority score
#[tokio::test]
async fn test_recently_analyzed_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let fresh = candidate("0000000002", "Fresh Co", SizeTier::Small);
    record_analysis(&pool, &fresh, 10, 12, 95.0, "fp-1").await;

    let feed = StubFeed::new(vec![fresh]);
    let engine = engine(pool.clone(), feed);
    engine.refresh_priorities(90).await.unwrap();

    // High score from the boosts, still not eligible
    let record = db::priorities::load_priority(&pool, "0000000002")
        .await
        .unwrap()
        .unwrap();
    assert!(record.priority_score > 50.0);

    let run_id = Uuid::new_v4();
    let shortlist = engine
        .build_shortlist(run_id, &SchedulerSettings::default(), None)
        .await
        .unwrap();
    assert!(shortlist.is_empty());

    let decisions = db::decisions::decisions_for_run(&pool, run_id).await.unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].action, DecisionAction::Skip);
    assert_eq!(decisions[0].reason, ReasonCode::RecentlyAnalyzed);
    assert!(decisions[0].detail.contains("10 days"));
}

/// A company past twice the interval comes back as stale data
#[tokio::test]
async fn test_stale_company_selected() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let stale = candidate("0000000003", "Stale Co", SizeTier::Mid);
    record_analysis(&pool, &stale, 200, 3, 50.0, "fp-1").await;

    let feed = StubFeed::new(vec![stale]);
    let engine = engine(pool.clone(), feed);
    engine.refresh_priorities(90).await.unwrap();

    let shortlist = engine
        .build_shortlist(Uuid::new_v4(), &SchedulerSettings::default(), None)
        .await
        .unwrap();

    assert_eq!(shortlist.len(), 1);
    assert_eq!(shortlist[0].reason, ReasonCode::StaleData);
    assert!(shortlist[0].days_since_last.is_some_and(|d| d >= 180));
}

/// An eligible company whose last analysis used a different catalog is
/// re-selected for the catalog change
#[tokio::test]
async fn test_catalog_change_triggers_reanalysis() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let c = candidate("0000000004", "Catalog Co", SizeTier::Large);
    record_analysis(&pool, &c, 100, 4, 60.0, "fp-old").await;

    let feed = StubFeed::new(vec![c]);
    let engine = engine(pool.clone(), feed);
    engine.refresh_priorities(90).await.unwrap();

    let shortlist = engine
        .build_shortlist(Uuid::new_v4(), &SchedulerSettings::default(), Some("fp-new"))
        .await
        .unwrap();

    assert_eq!(shortlist.len(), 1);
    assert_eq!(shortlist[0].reason, ReasonCode::CatalogUpdated);
}

/// Tier order is strict: a later tier never displaces an earlier tier's
/// pick, whatever the scores say
#[tokio::test]
async fn test_tier_order_beats_score() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;

    let small = candidate("0000000005", "Small Co", SizeTier::Small);
    let mega = candidate("0000000006", "Mega Co", SizeTier::Mega);
    // Mega has a glowing history, small is brand new
    record_analysis(&pool, &mega, 200, 15, 92.0, "fp-1").await;

    let feed = StubFeed::new(vec![small, mega]);
    let engine = engine(pool.clone(), feed);
    engine.refresh_priorities(90).await.unwrap();

    let mut settings = SchedulerSettings::default();
    settings.max_companies_per_run = 1;

    let run_id = Uuid::new_v4();
    let shortlist = engine
        .build_shortlist(run_id, &settings, None)
        .await
        .unwrap();

    assert_eq!(shortlist.len(), 1);
    assert_eq!(shortlist[0].candidate.cik, "0000000005");

    let decisions = db::decisions::decisions_for_run(&pool, run_id).await.unwrap();
    let skip = decisions
        .iter()
        .find(|d| d.cik == "0000000006")
        .expect("mega company decision");
    assert_eq!(skip.action, DecisionAction::Skip);
    assert_eq!(skip.reason, ReasonCode::CapReached);
}

/// Within a tier, equal scores break by staleness with never-analyzed first
#[tokio::test]
async fn test_staleness_tie_break() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;

    let analyzed = candidate("0000000007", "Old Co", SizeTier::Small);
    let never = candidate("0000000008", "Never Co", SizeTier::Small);
    // 1 analysis, no boosts: same base score as a first-timer
    record_analysis(&pool, &analyzed, 200, 2, 40.0, "fp-1").await;

    let feed = StubFeed::new(vec![analyzed, never]);
    let engine = engine(pool.clone(), feed);
    engine.refresh_priorities(90).await.unwrap();

    let shortlist = engine
        .build_shortlist(Uuid::new_v4(), &SchedulerSettings::default(), None)
        .await
        .unwrap();

    assert_eq!(shortlist.len(), 2);
    assert_eq!(shortlist[0].candidate.cik, "0000000008");
    assert_eq!(shortlist[1].candidate.cik, "0000000007");
}

/// CIKs from the feed are zero-padded before any lookup
#[tokio::test]
async fn test_cik_normalization() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let padded = candidate("0000000009", "Pad Co", SizeTier::Small);
    record_analysis(&pool, &padded, 10, 1, 30.0, "fp-1").await;

    // Feed hands out the unpadded form
    let feed = StubFeed::new(vec![candidate("9", "Pad Co", SizeTier::Small)]);
    let engine = engine(pool.clone(), feed);
    engine.refresh_priorities(90).await.unwrap();

    // History is found, so the freshness gate applies
    let shortlist = engine
        .build_shortlist(Uuid::new_v4(), &SchedulerSettings::default(), None)
        .await
        .unwrap();
    assert!(shortlist.is_empty());
}

struct ScriptedAgent {
    response: String,
}

#[async_trait]
impl ReasoningProvider for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted-agent"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok(self.response.clone())
    }
}

fn agent_engine(pool: sqlx::SqlitePool, feed: StubFeed, response: &str) -> SelectionEngine {
    let mut gateway = ReasoningGateway::new();
    gateway.push(
        Arc::new(ScriptedAgent {
            response: response.to_string(),
        }),
        600_000,
    );
    SelectionEngine::new(
        pool,
        Arc::new(feed),
        Arc::new(gateway),
        ScoringWeights::default(),
    )
}

/// The agent may reorder the shortlist when its output references only
/// known candidates
#[tokio::test]
async fn test_agent_rerank_applies() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let feed = StubFeed::new(vec![
        candidate("0000000010", "Alpha", SizeTier::Small),
        candidate("0000000011", "Beta", SizeTier::Small),
    ]);
    let engine = agent_engine(
        pool.clone(),
        feed,
        r#"[{"cik":"0000000011","rationale":"larger footprint"},{"cik":"0000000010","rationale":"ok"}]"#,
    );

    let shortlist = engine
        .build_shortlist(Uuid::new_v4(), &SchedulerSettings::default(), None)
        .await
        .unwrap();

    assert_eq!(shortlist.len(), 2);
    assert_eq!(shortlist[0].candidate.cik, "0000000011");
    assert_eq!(shortlist[0].reason, ReasonCode::AgentSuggested);
}

/// Agent output naming an unknown company is rejected wholesale and the
/// rule-based order survives
#[tokio::test]
async fn test_agent_rerank_rejects_unknown_cik() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let feed = StubFeed::new(vec![
        candidate("0000000010", "Alpha", SizeTier::Small),
        candidate("0000000011", "Beta", SizeTier::Small),
    ]);
    let engine = agent_engine(
        pool.clone(),
        feed,
        r#"[{"cik":"0000009999","rationale":"made up"}]"#,
    );

    let shortlist = engine
        .build_shortlist(Uuid::new_v4(), &SchedulerSettings::default(), None)
        .await
        .unwrap();

    assert_eq!(shortlist.len(), 2);
    assert_eq!(shortlist[0].candidate.cik, "0000000010");
    assert_eq!(shortlist[0].reason, ReasonCode::FirstTime);
}

/// Unparseable agent output falls back to the rule-based order
#[tokio::test]
async fn test_agent_rerank_garbage_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let feed = StubFeed::new(vec![
        candidate("0000000010", "Alpha", SizeTier::Small),
        candidate("0000000011", "Beta", SizeTier::Small),
    ]);
    let engine = agent_engine(pool.clone(), feed, "sorry, I cannot rank these");

    let shortlist = engine
        .build_shortlist(Uuid::new_v4(), &SchedulerSettings::default(), None)
        .await
        .unwrap();

    assert_eq!(shortlist.len(), 2);
    assert_eq!(shortlist[0].candidate.cik, "0000000010");
}

/// Disabling the agent skips the reasoning call entirely
#[tokio::test]
async fn test_agent_disabled_by_settings() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_in(&dir).await;
    let feed = StubFeed::new(vec![
        candidate("0000000010", "Alpha", SizeTier::Small),
        candidate("0000000011", "Beta", SizeTier::Small),
    ]);
    // Agent would reverse the order if consulted
    let engine = agent_engine(
        pool.clone(),
        feed,
        r#"[{"cik":"0000000011","rationale":"x"},{"cik":"0000000010","rationale":"y"}]"#,
    );

    let mut settings = SchedulerSettings::default();
    settings.use_agent = false;

    let shortlist = engine
        .build_shortlist(Uuid::new_v4(), &settings, None)
        .await
        .unwrap();
    assert_eq!(shortlist[0].candidate.cik, "0000000010");
}
