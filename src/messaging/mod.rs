//! Engine event notifications
//!
//! Queue mutations and drive-tree changes are broadcast to interested
//! observers (a realtime notification layer, operational tooling, tests).
//! Emission never blocks and never fails: with no subscribers the event
//! is simply dropped.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::jobs::types::Job;

const CHANNEL_CAPACITY: usize = 64;

/// Broadcast event payloads
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Whole-queue snapshot after any mutation of a tenant's jobs
    JobsChanged { tenant: String, jobs: Vec<Job> },
    /// The tenant's drive tree was regenerated by a sync
    DriveChanged { tenant: String },
}

/// Process-wide event fan-out
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; a send with no receivers is a no-op
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
