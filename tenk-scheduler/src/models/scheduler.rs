//! Scheduler state machine types
//!
//! Run mode is a tagged enum with exactly one active variant, so the illegal
//! "cron and continuous both enabled" state cannot be represented.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::company::SizeTier;

/// Scheduler execution mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RunMode {
    /// No timers armed, no background loop
    Stopped,
    /// Timer armed from a cron cadence expression
    Cron { expression: String },
    /// Back-to-back runs separated by a fixed delay
    Continuous { delay_minutes: u64 },
}

impl RunMode {
    pub fn is_stopped(&self) -> bool {
        matches!(self, RunMode::Stopped)
    }

    /// Short label for status reporting
    pub fn label(&self) -> &'static str {
        match self {
            RunMode::Stopped => "stopped",
            RunMode::Cron { .. } => "cron",
            RunMode::Continuous { .. } => "continuous",
        }
    }
}

/// Durable scheduler configuration (singleton row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub mode: RunMode,
    /// Tier processing order, highest priority first
    pub tier_priority: Vec<SizeTier>,
    /// Candidate superset size fetched per tier
    pub batch_size: i64,
    /// Re-analyze a company after this many days
    pub analysis_interval_days: i64,
    /// Overall shortlist cap per run
    pub max_companies_per_run: i64,
    /// Guard against coalesced duplicate timer fires
    pub min_minutes_between_runs: i64,
    pub max_concurrent_analyses: i64,
    /// Hand the ranked shortlist to the reasoning agent for re-ranking
    pub use_agent: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::Stopped,
            tier_priority: vec![
                SizeTier::Small,
                SizeTier::Mid,
                SizeTier::Large,
                SizeTier::Mega,
            ],
            batch_size: 10,
            analysis_interval_days: 90,
            max_companies_per_run: 50,
            min_minutes_between_runs: 60,
            max_concurrent_analyses: 5,
            use_agent: true,
        }
    }
}

/// Partial settings update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub mode: Option<RunMode>,
    pub tier_priority: Option<Vec<SizeTier>>,
    pub batch_size: Option<i64>,
    pub analysis_interval_days: Option<i64>,
    pub max_companies_per_run: Option<i64>,
    pub min_minutes_between_runs: Option<i64>,
    pub max_concurrent_analyses: Option<i64>,
    pub use_agent: Option<bool>,
}

impl SchedulerSettings {
    /// Apply a partial update in place
    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(mode) = update.mode {
            self.mode = mode;
        }
        if let Some(v) = update.tier_priority {
            self.tier_priority = v;
        }
        if let Some(v) = update.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = update.analysis_interval_days {
            self.analysis_interval_days = v;
        }
        if let Some(v) = update.max_companies_per_run {
            self.max_companies_per_run = v;
        }
        if let Some(v) = update.min_minutes_between_runs {
            self.min_minutes_between_runs = v;
        }
        if let Some(v) = update.max_concurrent_analyses {
            self.max_concurrent_analyses = v;
        }
        if let Some(v) = update.use_agent {
            self.use_agent = v;
        }
    }
}

/// Liveness record persisted separately from settings so it survives restarts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerLiveness {
    pub next_wake_at: Option<DateTime<Utc>>,
    pub last_wake_at: Option<DateTime<Utc>>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
}

/// What caused a run to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Timer,
    Manual,
    Continuous,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Timer => "timer",
            TriggerSource::Manual => "manual",
            TriggerSource::Continuous => "continuous",
        }
    }
}

/// Run lifecycle status; transitions are monotonic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// One scheduling cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub triggered_by: TriggerSource,
    pub trigger_time: DateTime<Utc>,
    pub status: RunStatus,
    /// Shortlist snapshot, fixed at creation
    pub companies_selected: Vec<super::company::Candidate>,
    pub companies_analyzed: i64,
    pub companies_skipped: i64,
    pub companies_failed: i64,
    pub job_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(triggered_by: TriggerSource) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            triggered_by,
            trigger_time: Utc::now(),
            status: RunStatus::Pending,
            companies_selected: Vec::new(),
            companies_analyzed: 0,
            companies_skipped: 0,
            companies_failed: 0,
            job_id: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }
}
