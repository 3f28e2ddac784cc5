use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::jobs::manager::JobManager;
use crate::jobs::types::{Job, JobKind, JobProgress, JobRequest};
use crate::jobs::ScheduleOutcome;
use crate::AnyError;

/// Everything a handler may touch while performing one job
///
/// Cheap to clone; handlers hand clones into progress closures. The
/// manager reference is only held for the duration of the run.
#[derive(Clone)]
pub struct HandlerContext {
    pub(crate) manager: Arc<JobManager>,
    pub(crate) tenant: String,
    pub(crate) job: Job,
}

impl HandlerContext {
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn payload(&self) -> Option<&str> {
        self.job.payload.as_deref()
    }

    /// Stamps progress onto the running job and notifies observers
    pub async fn progress(&self, completed: usize, total: usize) {
        self.manager
            .update_progress(&self.tenant, self.job.id, JobProgress { completed, total })
            .await;
    }

    /// Schedules another job for the same tenant, subject to the usual
    /// admission control
    pub async fn schedule_followup(&self, request: JobRequest) -> ScheduleOutcome {
        self.manager.schedule(&self.tenant, request).await
    }
}

/// One job kind's execution contract
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, ctx: HandlerContext) -> Result<(), AnyError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no handler registered for job kind: {0}")]
    NotFound(JobKind),
}

/// Registry mapping job kinds to handler instances
///
/// Built-in engines register here at bootstrap; collaborators add their
/// own kinds the same way. The registry is fixed once the manager takes
/// it, so new kinds need a restart, not a lock.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: JobKind) -> Result<Arc<dyn JobHandler>, RegistryError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::NotFound(kind))
    }

    pub fn has_handler(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        self.handlers.keys().copied().collect()
    }
}
