//! Company candidate, priority, and decision types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Company size tier, ordered from highest default scheduling priority down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Small,
    Mid,
    Large,
    Mega,
}

impl SizeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeTier::Small => "small",
            SizeTier::Mid => "mid",
            SizeTier::Large => "large",
            SizeTier::Mega => "mega",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "small" => Some(SizeTier::Small),
            "mid" => Some(SizeTier::Mid),
            "large" => Some(SizeTier::Large),
            "mega" => Some(SizeTier::Mega),
            _ => None,
        }
    }
}

/// A company eligible for analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// SEC Central Index Key, zero-padded to 10 digits
    pub cik: String,
    pub name: String,
    pub ticker: Option<String>,
    pub tier: SizeTier,
}

impl Candidate {
    /// Zero-pad a raw CIK to the canonical 10-digit form
    pub fn normalize_cik(raw: &str) -> String {
        format!("{:0>10}", raw.trim())
    }
}

/// Why a company was considered for analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Never analyzed before
    FirstTime,
    /// Last analysis is older than the configured interval
    StaleData,
    /// Catalog fingerprint changed since the last analysis
    CatalogUpdated,
    /// Interval elapsed, routine re-analysis
    PeriodicRefresh,
    /// Past results mark this company high-value
    HighPriority,
    /// The reasoning agent promoted this company
    AgentSuggested,
    /// Analyzed too recently; the freshness gate excludes it
    RecentlyAnalyzed,
    /// Eligible, but the shortlist cap was already reached
    CapReached,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::FirstTime => "first_time",
            ReasonCode::StaleData => "stale_data",
            ReasonCode::CatalogUpdated => "catalog_updated",
            ReasonCode::PeriodicRefresh => "periodic_refresh",
            ReasonCode::HighPriority => "high_priority",
            ReasonCode::AgentSuggested => "agent_suggested",
            ReasonCode::RecentlyAnalyzed => "recently_analyzed",
            ReasonCode::CapReached => "cap_reached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first_time" => Some(ReasonCode::FirstTime),
            "stale_data" => Some(ReasonCode::StaleData),
            "catalog_updated" => Some(ReasonCode::CatalogUpdated),
            "periodic_refresh" => Some(ReasonCode::PeriodicRefresh),
            "high_priority" => Some(ReasonCode::HighPriority),
            "agent_suggested" => Some(ReasonCode::AgentSuggested),
            "recently_analyzed" => Some(ReasonCode::RecentlyAnalyzed),
            "cap_reached" => Some(ReasonCode::CapReached),
            _ => None,
        }
    }
}

/// A candidate enriched with its analysis history and computed priority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateContext {
    pub candidate: Candidate,
    /// Days since the last completed analysis; `None` for first-timers
    pub days_since_last: Option<i64>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub times_analyzed: i64,
    pub total_findings: i64,
    pub avg_fit_score: Option<f64>,
    /// Any past fit score crossed the high-value threshold
    pub has_high_value: bool,
    pub priority_score: f64,
    pub reason: ReasonCode,
}

/// Durable per-company priority statistics (one row per CIK)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityRecord {
    pub cik: String,
    pub company_name: String,
    /// Last tier this company was seen in from the candidate feed
    pub tier: Option<SizeTier>,
    pub priority_score: f64,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    /// Earliest time the freshness gate admits this company again
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub times_analyzed: i64,
    pub total_findings: i64,
    pub avg_fit_score: Option<f64>,
    pub has_high_value: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Outcome the selector chose for a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Analyze,
    Skip,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Analyze => "analyze",
            DecisionAction::Skip => "skip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyze" => Some(DecisionAction::Analyze),
            "skip" => Some(DecisionAction::Skip),
            _ => None,
        }
    }
}

/// Snapshot of the priority inputs a decision was based on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub days_since_last: Option<i64>,
    pub times_analyzed: i64,
    pub total_findings: i64,
    pub avg_fit_score: Option<f64>,
    pub has_high_value: bool,
    pub priority_score: f64,
}

impl From<&CandidateContext> for DecisionSnapshot {
    fn from(context: &CandidateContext) -> Self {
        Self {
            days_since_last: context.days_since_last,
            times_analyzed: context.times_analyzed,
            total_findings: context.total_findings,
            avg_fit_score: context.avg_fit_score,
            has_high_value: context.has_high_value,
            priority_score: context.priority_score,
        }
    }
}

/// Auditable record of one selection decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: Uuid,
    pub run_id: Uuid,
    pub cik: String,
    pub company_name: String,
    pub action: DecisionAction,
    pub reason: ReasonCode,
    /// Free-form explanation ("last analyzed 120 days ago, 14 findings")
    pub detail: String,
    pub confidence: f64,
    pub priority_score: f64,
    /// Priority inputs as seen at decision time
    pub snapshot: DecisionSnapshot,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        run_id: Uuid,
        context: &CandidateContext,
        action: DecisionAction,
        detail: String,
        confidence: f64,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            run_id,
            cik: context.candidate.cik.clone(),
            company_name: context.candidate.name.clone(),
            action,
            reason: context.reason,
            detail,
            confidence,
            priority_score: context.priority_score,
            snapshot: DecisionSnapshot::from(context),
            decided_at: Utc::now(),
        }
    }
}
