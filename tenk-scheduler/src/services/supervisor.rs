//! Scheduler supervisor
//!
//! Owns the run cadence. Exactly one of three modes is active: stopped (no
//! timers, no loop), cron (timer armed from a cadence expression), or
//! continuous (run, sleep a delay, repeat). Mode changes always tear down
//! the old mode before arming the new one. Overlap is prevented by the
//! persisted single-slot job claim, not by task bookkeeping.

use chrono::Utc;
use cron::Schedule;
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tenk_common::events::{EngineEvent, EventBus};
use tenk_common::{Error, Result};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::catalog::Catalog;
use super::pipeline::PipelineEngine;
use super::selection::SelectionEngine;
use crate::db;
use crate::models::{
    Run, RunMode, RunStatus, SchedulerLiveness, SchedulerSettings, SettingsUpdate, TriggerSource,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(3600);

/// Parse a cadence expression. Five-field crontab expressions are accepted
/// and normalized to the six-field form (seconds prepended).
pub fn parse_cadence(expression: &str) -> Result<Schedule> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized)
        .map_err(|e| Error::Config(format!("Invalid cadence expression '{}': {}", expression, e)))
}

/// Snapshot for the read-only status surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    pub mode: RunMode,
    pub settings: SchedulerSettings,
    pub liveness: SchedulerLiveness,
    pub current_run_id: Option<Uuid>,
    pub recent_runs: Vec<Run>,
}

enum BeginOutcome {
    Started(Run),
    /// Another run holds the single-flight slot
    InFlight(Uuid),
    /// Timer fired again before the minimum spacing elapsed
    TooSoon,
}

struct Inner {
    pool: SqlitePool,
    selection: SelectionEngine,
    pipeline: PipelineEngine,
    events: EventBus,
    catalog_path: std::path::PathBuf,
    settings: RwLock<SchedulerSettings>,
    mode_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    poll_interval: Duration,
    run_timeout: Duration,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        pool: SqlitePool,
        selection: SelectionEngine,
        pipeline: PipelineEngine,
        events: EventBus,
        catalog_path: std::path::PathBuf,
    ) -> Self {
        Self::with_timing(
            pool,
            selection,
            pipeline,
            events,
            catalog_path,
            DEFAULT_POLL_INTERVAL,
            DEFAULT_RUN_TIMEOUT,
        )
    }

    /// Constructor with explicit poll/timeout durations (tests use short ones)
    #[allow(clippy::too_many_arguments)]
    pub fn with_timing(
        pool: SqlitePool,
        selection: SelectionEngine,
        pipeline: PipelineEngine,
        events: EventBus,
        catalog_path: std::path::PathBuf,
        poll_interval: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                selection,
                pipeline,
                events,
                catalog_path,
                settings: RwLock::new(SchedulerSettings::default()),
                mode_task: Mutex::new(None),
                poll_interval,
                run_timeout,
            }),
        }
    }

    /// Boot-time synchronization: abandon state left by a previous process,
    /// load durable settings, and arm the persisted mode. The next wake time
    /// is recomputed and written back, never trusted from the stale record.
    pub async fn start(&self) -> Result<()> {
        let stale_runs = db::runs::cleanup_stale_runs(&self.inner.pool).await?;
        let stale_jobs = db::jobs::cleanup_stale_jobs(&self.inner.pool).await?;
        let stale_claim = db::state::clear_stale_claim(&self.inner.pool).await?;
        if stale_runs > 0 || stale_jobs > 0 || stale_claim {
            tracing::warn!(
                stale_runs,
                stale_jobs,
                stale_claim,
                "Cleaned up state from a previous process"
            );
        }

        let settings = db::state::load_settings(&self.inner.pool).await?;
        *self.inner.settings.write().await = settings.clone();

        self.arm_mode(&settings.mode).await?;
        tracing::info!(mode = settings.mode.label(), "Scheduler started");
        Ok(())
    }

    /// Stop the supervisor: disarm the timer or cancel the continuous loop.
    /// An in-flight batch job is not aborted; it reaches a terminal state on
    /// its own or trips the poll timeout.
    pub async fn stop(&self) {
        self.tear_down_mode().await;
        tracing::info!("Scheduler stopped");
    }

    /// Apply a partial configuration update. A malformed cadence expression
    /// is rejected before anything changes; the previous configuration stays
    /// active.
    pub async fn apply_config(&self, update: SettingsUpdate) -> Result<SchedulerSettings> {
        if let Some(RunMode::Cron { expression }) = &update.mode {
            parse_cadence(expression)?;
        }

        self.tear_down_mode().await;

        let settings = {
            let mut guard = self.inner.settings.write().await;
            guard.apply(update);
            guard.clone()
        };
        db::state::save_settings(&self.inner.pool, &settings).await?;

        self.arm_mode(&settings.mode).await?;
        tracing::info!(mode = settings.mode.label(), "Configuration applied");
        Ok(settings)
    }

    /// Force an immediate run. Subject to the same single-flight guard as
    /// timer runs; returns the in-flight run id when one is already active.
    pub async fn trigger_now(&self) -> Result<Uuid> {
        match self.begin_run(TriggerSource::Manual).await? {
            BeginOutcome::InFlight(run_id) => Ok(run_id),
            BeginOutcome::TooSoon => unreachable!("manual runs skip the spacing check"),
            BeginOutcome::Started(run) => {
                let run_id = run.run_id;
                let supervisor = self.clone();
                tokio::spawn(async move {
                    supervisor.drive_run(run).await;
                });
                Ok(run_id)
            }
        }
    }

    /// Read-only status snapshot
    pub async fn status(&self) -> Result<StatusReport> {
        let settings = self.inner.settings.read().await.clone();
        Ok(StatusReport {
            mode: settings.mode.clone(),
            settings,
            liveness: db::state::load_liveness(&self.inner.pool).await?,
            current_run_id: db::state::current_job(&self.inner.pool).await?,
            recent_runs: db::runs::recent_runs(&self.inner.pool, 10).await?,
        })
    }

    async fn tear_down_mode(&self) {
        let mut guard = self.inner.mode_task.lock().await;
        if let Some((token, handle)) = guard.take() {
            token.cancel();
            // The loop exits at its next checkpoint; an in-flight run keeps
            // going and the job claim prevents any overlap with a new mode.
            drop(handle);
        }
    }

    async fn arm_mode(&self, mode: &RunMode) -> Result<()> {
        match mode {
            RunMode::Stopped => {
                let mut liveness = db::state::load_liveness(&self.inner.pool).await?;
                liveness.next_wake_at = None;
                db::state::save_liveness(&self.inner.pool, &liveness).await?;
            }
            RunMode::Cron { expression } => {
                let schedule = parse_cadence(expression)?;
                let token = CancellationToken::new();
                let supervisor = self.clone();
                let loop_token = token.clone();
                let handle = tokio::spawn(async move {
                    supervisor.cron_loop(schedule, loop_token).await;
                });
                *self.inner.mode_task.lock().await = Some((token, handle));
            }
            RunMode::Continuous { delay_minutes } => {
                let delay = Duration::from_secs(delay_minutes * 60);
                let token = CancellationToken::new();
                let supervisor = self.clone();
                let loop_token = token.clone();
                let handle = tokio::spawn(async move {
                    supervisor.continuous_loop(delay, loop_token).await;
                });
                *self.inner.mode_task.lock().await = Some((token, handle));
            }
        }
        Ok(())
    }

    /// Timer loop: each fire time is recomputed from the cadence, so missed
    /// fires coalesce into the next one instead of queueing.
    async fn cron_loop(self, schedule: Schedule, token: CancellationToken) {
        loop {
            let next = match schedule.upcoming(Utc).next() {
                Some(next) => next,
                None => {
                    tracing::warn!("Cadence has no future fire times, loop exiting");
                    break;
                }
            };

            if let Err(e) = self.write_next_wake(Some(next)).await {
                tracing::error!(error = %e, "Failed to persist next wake time");
            }

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            if token.is_cancelled() {
                break;
            }

            self.run_to_completion(TriggerSource::Timer).await;
        }
    }

    async fn continuous_loop(self, delay: Duration, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            self.run_to_completion(TriggerSource::Continuous).await;

            if let Err(e) = self
                .write_next_wake(Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()))
                .await
            {
                tracing::error!(error = %e, "Failed to persist next wake time");
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn write_next_wake(&self, next: Option<chrono::DateTime<Utc>>) -> Result<()> {
        let mut liveness = db::state::load_liveness(&self.inner.pool).await?;
        liveness.next_wake_at = next;
        db::state::save_liveness(&self.inner.pool, &liveness).await
    }

    async fn run_to_completion(&self, trigger: TriggerSource) {
        match self.begin_run(trigger).await {
            Ok(BeginOutcome::Started(run)) => self.drive_run(run).await,
            Ok(BeginOutcome::InFlight(run_id)) => {
                tracing::warn!(in_flight = %run_id, "Run already active, trigger ignored");
            }
            Ok(BeginOutcome::TooSoon) => {
                tracing::info!("Timer fired inside the minimum spacing window, ignored");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to begin run");
            }
        }
    }

    async fn begin_run(&self, trigger: TriggerSource) -> Result<BeginOutcome> {
        // Spacing guard for timer fires only: coalesced timers can deliver
        // near-simultaneous duplicates.
        if trigger == TriggerSource::Timer {
            let min_minutes = self.inner.settings.read().await.min_minutes_between_runs;
            if let Some(last) = db::runs::last_trigger_time(&self.inner.pool).await? {
                if (Utc::now() - last).num_minutes() < min_minutes {
                    return Ok(BeginOutcome::TooSoon);
                }
            }
        }

        let run = Run::new(trigger);
        if !db::state::claim_current_job(&self.inner.pool, run.run_id).await? {
            let in_flight = db::state::current_job(&self.inner.pool)
                .await?
                .unwrap_or(run.run_id);
            return Ok(BeginOutcome::InFlight(in_flight));
        }

        // A run that never gets its row must not keep the slot; release
        // before propagating so the next trigger can claim it.
        if let Err(e) = db::runs::save_run(&self.inner.pool, &run).await {
            if let Err(release_err) =
                db::state::release_current_job(&self.inner.pool, run.run_id).await
            {
                tracing::error!(
                    run_id = %run.run_id,
                    error = %release_err,
                    "Failed to release job claim after run insert failure"
                );
            }
            return Err(e);
        }
        self.inner.events.emit_lossy(EngineEvent::RunStarted {
            run_id: run.run_id,
            triggered_by: trigger.as_str().to_string(),
            timestamp: Utc::now(),
        });
        Ok(BeginOutcome::Started(run))
    }

    /// Execute one run to a terminal state. The single-flight claim is
    /// always released, and the run row always reaches `completed` or
    /// `failed`, whatever happens inside.
    async fn drive_run(&self, mut run: Run) {
        let run_id = run.run_id;
        let outcome = self.execute_run(&mut run).await;

        match outcome {
            Ok(()) => {
                run.status = RunStatus::Completed;
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "Run failed");
                run.status = RunStatus::Failed;
                run.error_message = Some(e.to_string());
            }
        }
        run.completed_at = Some(Utc::now());

        if let Err(e) = db::runs::save_run(&self.inner.pool, &run).await {
            tracing::error!(run_id = %run_id, error = %e, "Failed to persist run outcome");
        }
        if let Err(e) = db::state::release_current_job(&self.inner.pool, run_id).await {
            tracing::error!(run_id = %run_id, error = %e, "Failed to release job claim");
        }
        if let Err(e) = self.record_liveness(run.status).await {
            tracing::error!(run_id = %run_id, error = %e, "Failed to update liveness");
        }

        self.inner.events.emit_lossy(EngineEvent::RunFinished {
            run_id,
            status: run.status.as_str().to_string(),
            analyzed: run.companies_analyzed,
            skipped: run.companies_skipped,
            failed: run.companies_failed,
            timestamp: Utc::now(),
        });
    }

    async fn execute_run(&self, run: &mut Run) -> Result<()> {
        let settings = self.inner.settings.read().await.clone();

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        db::runs::save_run(&self.inner.pool, run).await?;

        self.inner
            .selection
            .refresh_priorities(settings.analysis_interval_days)
            .await?;

        // A missing or unreadable catalog only disables the fingerprint
        // reason check; selection still proceeds.
        let catalog = Catalog::load(&self.inner.catalog_path).ok();
        let fingerprint = catalog.as_ref().map(|c| c.fingerprint().to_string());

        let shortlist = self
            .inner
            .selection
            .build_shortlist(run.run_id, &settings, fingerprint.as_deref())
            .await?;

        if shortlist.is_empty() {
            tracing::info!(run_id = %run.run_id, "No eligible candidates, run complete");
            return Ok(());
        }

        run.companies_selected = shortlist.into_iter().map(|c| c.candidate).collect();
        let job_id = self
            .inner
            .pipeline
            .start_job(Some(run.run_id), run.companies_selected.clone(), false)
            .await?;
        run.job_id = Some(job_id);
        db::runs::save_run(&self.inner.pool, run).await?;

        // Poll until the job is terminal or the wall-clock timeout trips; a
        // timed-out run fails loudly instead of staying pending forever.
        let deadline = tokio::time::Instant::now() + self.inner.run_timeout;
        loop {
            tokio::time::sleep(self.inner.poll_interval).await;

            let job = db::jobs::load_job(&self.inner.pool, job_id)
                .await?
                .ok_or_else(|| Error::Internal(format!("Job {} vanished", job_id)))?;

            if job.status.is_terminal() {
                run.companies_analyzed = job.completed;
                run.companies_skipped = job.skipped;
                run.companies_failed = job.failed;
                if let Some(error) = job.error_message {
                    return Err(Error::Internal(format!("Batch job failed: {}", error)));
                }
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                run.companies_analyzed = job.completed;
                run.companies_skipped = job.skipped;
                run.companies_failed = job.failed;
                return Err(Error::Internal(format!(
                    "Run timed out after {}s waiting for job {}",
                    self.inner.run_timeout.as_secs(),
                    job_id
                )));
            }
        }
    }

    async fn record_liveness(&self, status: RunStatus) -> Result<()> {
        let mut liveness = db::state::load_liveness(&self.inner.pool).await?;
        liveness.last_wake_at = Some(Utc::now());
        liveness.total_runs += 1;
        match status {
            RunStatus::Completed => liveness.successful_runs += 1,
            _ => liveness.failed_runs += 1,
        }
        db::state::save_liveness(&self.inner.pool, &liveness).await
    }
}
