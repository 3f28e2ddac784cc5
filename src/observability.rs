//! Observability stubs (metrics, tracing)

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters/gauges
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_scheduled: AtomicU64,
    jobs_discarded: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    permits_issued: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_scheduled(&self) {
        self.jobs_scheduled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_scheduled", "Metric incremented");
    }

    pub fn job_discarded(&self) {
        self.jobs_discarded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_discarded", "Metric incremented");
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn permit_issued(&self) {
        self.permits_issued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "permits_issued", "Metric incremented");
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_completed", "Metric incremented");
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_failed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_scheduled: self.jobs_scheduled.load(Ordering::Relaxed),
            jobs_discarded: self.jobs_discarded.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            permits_issued: self.permits_issued.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_scheduled: u64,
    pub jobs_discarded: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub permits_issued: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}
