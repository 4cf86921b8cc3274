//! tenk-scheduler - autonomous filing-analysis scheduler
//!
//! Loads configuration, wires the engine, arms the persisted run mode, and
//! keeps running until interrupted. All interaction happens through the
//! database and the configuration file; there is no serving surface.

use anyhow::Result;
use std::path::PathBuf;
use tenk_common::config::AppConfig;
use tenk_common::events::{EngineEvent, EventBus};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting tenk-scheduler");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Optional config path as the first argument
    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    info!("Data directory: {}", config.data_dir.display());

    let events = EventBus::new(100);

    // Log lifecycle events so an operator can follow runs from the journal
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                EngineEvent::RunStarted { run_id, triggered_by, .. } => {
                    info!(run_id = %run_id, trigger = %triggered_by, "Run started");
                }
                EngineEvent::RunFinished {
                    run_id,
                    status,
                    analyzed,
                    skipped,
                    failed,
                    ..
                } => {
                    info!(
                        run_id = %run_id,
                        status = %status,
                        analyzed,
                        skipped,
                        failed,
                        "Run finished"
                    );
                }
                EngineEvent::CompanyFinished { cik, outcome, .. } => {
                    info!(cik = %cik, outcome = %outcome, "Company finished");
                }
                EngineEvent::JobProgress { .. } => {}
            }
        }
    });

    let supervisor = tenk_scheduler::build_supervisor(&config, events).await?;
    supervisor.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    supervisor.stop().await;

    Ok(())
}
