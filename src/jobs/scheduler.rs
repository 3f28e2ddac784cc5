//! Scheduler loop
//!
//! One timer drives every tenant. The loop itself never awaits a
//! handler; `JobManager::tick` dispatches fire-and-forget and a slow job
//! only ever delays its own tenant.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::jobs::manager::JobManager;

/// Handle to the running loop; dropping it does not stop the loop,
/// `stop` does
pub struct SchedulerHandle {
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Spawns the fixed-cadence loop driving `JobManager::tick`
pub fn start(manager: Arc<JobManager>) -> SchedulerHandle {
    let tick = manager.config().tick.as_duration();
    info!(tick = %manager.config().tick, "Scheduler started");
    let task = tokio::spawn(async move {
        let mut timer = interval(tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            manager.tick(Utc::now()).await;
        }
    });
    SchedulerHandle { task }
}
