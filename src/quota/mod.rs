//! Sliding-window quota limiter for the upstream API
//!
//! Consumptions are recorded as timestamps; `acquire()` suspends the
//! caller while the trailing window is full. The ledger round-trips
//! through the record store so a restart resumes with the window intact.
//! Durability is advisory: a failed or lost save can let a brief burst
//! through after a crash, which the upstream absorbs.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::AnyError;
use crate::observability::Metrics;

/// Persisted consumption history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaLedger {
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Window configuration
///
/// The reference deployment runs 95 permits per 10 seconds, deliberately
/// under the provider's nominal cap to absorb clock skew.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimit {
    pub count: usize,
    pub window: std::time::Duration,
}

impl QuotaLimit {
    pub fn new(count: usize, window: std::time::Duration) -> Self {
        Self { count, window }
    }
}

type SaveHandler = Box<dyn Fn(&QuotaLedger) -> Result<(), AnyError> + Send + Sync>;

struct LimiterState {
    history: VecDeque<DateTime<Utc>>,
    save_handler: Option<SaveHandler>,
    last_saved: Option<String>,
}

/// Throttles calls against a rate-limited upstream
pub struct QuotaLimiter {
    limit: QuotaLimit,
    window: chrono::Duration,
    state: Mutex<LimiterState>,
    metrics: Arc<Metrics>,
}

impl QuotaLimiter {
    pub fn new(limit: QuotaLimit, ledger: QuotaLedger, metrics: Arc<Metrics>) -> Self {
        let window = chrono::Duration::milliseconds(limit.window.as_millis() as i64);
        Self {
            limit,
            window,
            state: Mutex::new(LimiterState {
                history: ledger.timestamps.into_iter().collect(),
                save_handler: None,
                last_saved: None,
            }),
            metrics,
        }
    }

    pub fn limit(&self) -> QuotaLimit {
        self.limit
    }

    /// Register the persistence callback, invoked after ledger mutation.
    /// Identical consecutive snapshots are skipped; a failed save is
    /// logged and never blocks acquisition.
    pub async fn on_save<F>(&self, handler: F)
    where
        F: Fn(&QuotaLedger) -> Result<(), AnyError> + Send + Sync + 'static,
    {
        let mut state = self.state.lock().await;
        state.save_handler = Some(Box::new(handler));
    }

    /// Block until a permit fits inside the trailing window
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Utc::now();
                let cutoff = now - self.window;

                while let Some(front) = state.history.front() {
                    if *front <= cutoff {
                        state.history.pop_front();
                    } else {
                        break;
                    }
                }

                if state.history.len() < self.limit.count {
                    state.history.push_back(now);
                    self.metrics.permit_issued();
                    save_snapshot(&mut state);
                    None
                } else {
                    // Wait until the oldest consumption leaves the window,
                    // then re-check under the lock
                    let oldest = *state.history.front().unwrap_or(&now);
                    let ready_at = oldest + self.window;
                    let wait = (ready_at - now)
                        .to_std()
                        .unwrap_or(std::time::Duration::from_millis(1))
                        .max(std::time::Duration::from_millis(1));
                    Some(wait)
                }
            };

            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }

    /// Current ledger snapshot
    pub async fn ledger(&self) -> QuotaLedger {
        let state = self.state.lock().await;
        QuotaLedger {
            timestamps: state.history.iter().copied().collect(),
        }
    }

    /// Force a save of the current ledger (shutdown flush); still subject
    /// to the identical-snapshot debounce
    pub async fn save_now(&self) {
        let mut state = self.state.lock().await;
        save_snapshot(&mut state);
    }
}

fn save_snapshot(state: &mut LimiterState) {
    let LimiterState {
        history,
        save_handler,
        last_saved,
    } = state;

    let Some(handler) = save_handler.as_ref() else {
        return;
    };

    let ledger = QuotaLedger {
        timestamps: history.iter().copied().collect(),
    };

    let snapshot = match serde_json::to_string(&ledger) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(error = %err, "Quota ledger serialization failed");
            return;
        }
    };

    if last_saved.as_deref() == Some(snapshot.as_str()) {
        return;
    }

    if let Err(err) = handler(&ledger) {
        // Leave last_saved untouched so the next mutation retries
        warn!(error = %err, "Quota ledger save failed");
        return;
    }

    *last_saved = Some(snapshot);
}
