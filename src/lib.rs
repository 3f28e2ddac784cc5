pub mod config;
pub mod drive;
pub mod engine;
pub mod humanize;
pub mod jobs;
pub mod ledger;
pub mod messaging;
pub mod observability;
pub mod preview;
pub mod queue;
pub mod quota;
pub mod storage;
pub mod sync;
pub mod transform;

/// Boxed error type used at handler and task seams where callers only
/// need to log or surface the failure.
pub type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;
