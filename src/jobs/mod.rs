//! Job orchestration
//!
//! A job moves `waiting → running → done | failed` and never leaves a
//! terminal state; retries are always new jobs. The [`JobManager`] owns
//! every tenant queue, admission control dedups competing triggers, and
//! the scheduler loop keeps at most one job running per tenant while
//! tenants proceed independently.

pub mod admission;
pub mod manager;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod types;

pub use admission::{Admission, DiscardReason};
pub use manager::{JobManager, ScheduleOutcome};
pub use registry::{HandlerContext, HandlerRegistry, JobHandler, RegistryError};
pub use scheduler::{start, SchedulerHandle};
pub use types::{Job, JobKind, JobProgress, JobRequest, JobState};
