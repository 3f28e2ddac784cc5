//! Recursive task queue
//!
//! Traversal-style work where a task can discover more tasks: fetching a
//! folder yields one task per entry, fetching a file yields nothing. The
//! [`QueueDownloader`] runs the whole tree with a bounded number of tasks
//! in flight and resolves once nothing is pending or running.

pub mod downloader;
pub mod task;

pub use downloader::{DrainReport, Progress, QueueDownloader, TaskFailure};
pub use task::QueueTask;
