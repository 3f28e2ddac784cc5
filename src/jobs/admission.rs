//! Per-kind admission control
//!
//! Duplicate scheduling is an expected race from concurrent triggers, so
//! an inadmissible request is a quiet no-op for the caller, never an
//! error. Decisions are made against the tenant's current non-terminal
//! jobs only.

use crate::jobs::types::{Job, JobKind, JobRequest};

/// Outcome of evaluating a request against a tenant queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Append to the queue
    Admit,
    /// Append after discarding every job that is not currently running;
    /// a full sync supersedes queued partial work
    AdmitReplacingWaiting,
    /// Drop the request, queue unchanged
    Discard(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// A non-terminal full sync already covers this item
    FullSyncPending,
    /// A non-terminal single-item sync for the same payload exists
    DuplicatePayload,
    /// At most one non-terminal job of this kind may exist
    SingletonActive,
}

impl DiscardReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscardReason::FullSyncPending => "full sync pending",
            DiscardReason::DuplicatePayload => "duplicate payload",
            DiscardReason::SingletonActive => "singleton active",
        }
    }
}

pub fn admit(jobs: &[Job], request: &JobRequest) -> Admission {
    let active = |job: &&Job| !job.state.is_terminal();

    match request.kind {
        JobKind::Sync => {
            if jobs
                .iter()
                .filter(active)
                .any(|job| job.kind == JobKind::SyncAll)
            {
                return Admission::Discard(DiscardReason::FullSyncPending);
            }
            if jobs
                .iter()
                .filter(active)
                .any(|job| job.kind == JobKind::Sync && job.payload == request.payload)
            {
                return Admission::Discard(DiscardReason::DuplicatePayload);
            }
            Admission::Admit
        }
        JobKind::SyncAll => {
            if jobs
                .iter()
                .filter(active)
                .any(|job| job.kind == JobKind::SyncAll)
            {
                return Admission::Discard(DiscardReason::SingletonActive);
            }
            Admission::AdmitReplacingWaiting
        }
        JobKind::Transform | JobKind::RenderPreview => {
            if jobs
                .iter()
                .filter(active)
                .any(|job| job.kind == request.kind)
            {
                return Admission::Discard(DiscardReason::SingletonActive);
            }
            Admission::Admit
        }
        JobKind::Commit | JobKind::Push | JobKind::RunAction => Admission::Admit,
    }
}
