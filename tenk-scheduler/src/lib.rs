//! Autonomous scheduling and batch-pipeline execution engine
//!
//! Periodically selects companies, runs each through a multi-stage filing
//! analysis pipeline, and records auditable decisions and results. The
//! supervisor owns the cadence; the selection engine decides who gets
//! analyzed; the pipeline engine does the work.

pub mod db;
pub mod models;
pub mod providers;
pub mod services;

use std::sync::Arc;
use tenk_common::config::AppConfig;
use tenk_common::events::EventBus;
use tenk_common::Result;

use services::{
    CandidateFeed, EdgarClient, PipelineEngine, SelectionEngine, StaticCandidateFeed, Supervisor,
    VectorStore,
};

/// Wire the full engine from configuration: database, provider gateways,
/// filing source, candidate feed, and the three engines on top.
pub async fn build_supervisor(config: &AppConfig, events: EventBus) -> Result<Supervisor> {
    let pool = db::init_database_pool(&config.database_path()).await?;

    let reasoning = Arc::new(providers::build_reasoning_gateway(&config.reasoning)?);
    let embeddings = Arc::new(providers::build_embedding_gateway(&config.embedding)?);

    // A missing candidates file means an empty feed, not a startup failure;
    // runs then complete with empty shortlists until the file appears.
    let feed: Arc<dyn CandidateFeed> = if config.candidates_path.exists() {
        Arc::new(StaticCandidateFeed::load(&config.candidates_path)?)
    } else {
        tracing::warn!(
            path = %config.candidates_path.display(),
            "Candidates file missing, feed is empty"
        );
        Arc::new(StaticCandidateFeed::from_candidates(Vec::new()))
    };
    let edgar = Arc::new(EdgarClient::new(&config.sec_user_agent, config.filings_dir())?);

    let selection = SelectionEngine::new(
        pool.clone(),
        feed,
        reasoning.clone(),
        config.scoring,
    );

    let pipeline = PipelineEngine::new(
        pool.clone(),
        edgar,
        reasoning,
        embeddings,
        &config.reasoning,
        VectorStore::new(config.data_dir.join("vectors"), config.chunking),
        config.catalog_path.clone(),
        config.referee,
        events.clone(),
    );

    Ok(Supervisor::new(
        pool,
        selection,
        pipeline,
        events,
        config.catalog_path.clone(),
    ))
}
