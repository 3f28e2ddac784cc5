use async_trait::async_trait;

use crate::AnyError;

/// One unit of recursive work
///
/// `run` returns the follow-up tasks it discovered; the downloader owns
/// the queue, tasks never enqueue anything themselves. A task is dropped
/// as soon as its run finishes.
#[async_trait]
pub trait QueueTask: Send + Sync {
    /// Short human-readable context for logs and failure reports
    fn describe(&self) -> String;

    async fn run(&self) -> Result<Vec<Box<dyn QueueTask>>, AnyError>;
}
