use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::observability::Metrics;
use crate::queue::task::QueueTask;
use crate::AnyError;

/// Counters reported to progress listeners
///
/// `total` grows while tasks expand, so early reports understate the
/// final amount of work. `completed == total` only once the queue has
/// fully drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// A task that returned an error during the drain
pub struct TaskFailure {
    /// `describe()` of the failed task
    pub task: String,
    /// True when the task was enqueued via `add_task` rather than
    /// discovered as a child
    pub root: bool,
    pub error: AnyError,
}

/// Outcome of a full drain
pub struct DrainReport {
    pub progress: Progress,
    pub failures: Vec<TaskFailure>,
}

impl DrainReport {
    pub fn root_failed(&self) -> bool {
        self.failures.iter().any(|failure| failure.root)
    }
}

type ProgressCallback = Box<dyn Fn(Progress) + Send + Sync>;

/// Bounded-concurrency executor for recursive task trees
///
/// The downloader is the single owner of the pending queue. It keeps at
/// most `concurrency` tasks in flight, feeds children returned by
/// finished tasks back into the queue and reports progress after every
/// change. `finished` consumes the downloader and resolves only at the
/// fixed point where no task is pending or in flight.
pub struct QueueDownloader {
    concurrency: usize,
    pending: VecDeque<(Box<dyn QueueTask>, bool)>,
    completed: usize,
    total: usize,
    progress_callback: Option<ProgressCallback>,
    metrics: Arc<Metrics>,
}

impl QueueDownloader {
    pub fn new(concurrency: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            pending: VecDeque::new(),
            completed: 0,
            total: 0,
            progress_callback: None,
            metrics,
        }
    }

    /// Registers the listener invoked after every progress change
    pub fn on_progress_notify<F>(&mut self, callback: F)
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Enqueues a root task
    pub fn add_task(&mut self, task: Box<dyn QueueTask>) {
        self.total += 1;
        self.pending.push_back((task, true));
        self.notify();
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.completed,
            total: self.total,
        }
    }

    fn notify(&self) {
        if let Some(callback) = &self.progress_callback {
            callback(self.progress());
        }
    }

    /// Drains the queue to its fixed point and reports the outcome
    ///
    /// A failed task is recorded and does not stop its siblings; children
    /// it never returned are simply unknown to the queue.
    pub async fn finished(mut self) -> DrainReport {
        let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();
        let mut failures = Vec::new();

        loop {
            while join_set.len() < self.concurrency {
                let Some((task, root)) = self.pending.pop_front() else {
                    break;
                };
                let task_name = task.describe();
                join_set.spawn(async move {
                    let result = task.run().await;
                    (task_name, root, result)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            self.completed += 1;
            match joined {
                Ok((task_name, _, Ok(children))) => {
                    self.metrics.task_completed();
                    debug!(task = %task_name, children = children.len(), "Task completed");
                    self.total += children.len();
                    for child in children {
                        self.pending.push_back((child, false));
                    }
                }
                Ok((task_name, root, Err(error))) => {
                    self.metrics.task_failed();
                    warn!(task = %task_name, error = %error, "Task failed");
                    failures.push(TaskFailure {
                        task: task_name,
                        root,
                        error,
                    });
                }
                Err(join_error) => {
                    self.metrics.task_failed();
                    warn!(error = %join_error, "Task panicked");
                    failures.push(TaskFailure {
                        task: "<panicked>".to_string(),
                        root: false,
                        error: Box::new(join_error),
                    });
                }
            }
            self.notify();
        }

        DrainReport {
            progress: self.progress(),
            failures,
        }
    }
}

type TaskOutcome = (String, bool, Result<Vec<Box<dyn QueueTask>>, AnyError>);
