//! Event types and broadcast bus for the tenk engine
//!
//! Progress and lifecycle events are broadcast on a bounded channel; emitters
//! never block and never fail when nobody is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Engine event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A scheduling cycle started
    RunStarted {
        run_id: Uuid,
        triggered_by: String,
        timestamp: DateTime<Utc>,
    },

    /// A scheduling cycle reached a terminal state
    RunFinished {
        run_id: Uuid,
        status: String,
        analyzed: i64,
        skipped: i64,
        failed: i64,
        timestamp: DateTime<Utc>,
    },

    /// Batch job progress update
    JobProgress {
        job_id: Uuid,
        completed: i64,
        failed: i64,
        skipped: i64,
        total: i64,
        current_company: Option<String>,
        current_step: Option<String>,
        eta_seconds: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// One company reached a terminal per-entity outcome
    CompanyFinished {
        job_id: Uuid,
        cik: String,
        outcome: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for engine events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the subscriber count
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
