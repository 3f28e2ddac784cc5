//! Terminal-job retention
//!
//! Finished jobs are kept just long enough to be observed. When a job
//! finishes, terminal leftovers it supersedes are dropped in the same
//! queue update; the scheduler additionally sweeps every terminal job on
//! each tick, so nothing terminal survives longer than one cycle.

use crate::jobs::types::{Job, JobKind};

/// Drops terminal jobs made obsolete by the job that is finishing right
/// now. Call while `finishing` is still marked running so it survives
/// its own prune.
pub fn prune_on_completion(jobs: &mut Vec<Job>, finishing: &Job) {
    match finishing.kind {
        JobKind::SyncAll => {
            // a finished full sync obsoletes old full and single syncs
            jobs.retain(|job| {
                !(matches!(job.kind, JobKind::SyncAll | JobKind::Sync) && job.state.is_terminal())
            });
        }
        JobKind::Sync => {
            jobs.retain(|job| {
                !(job.kind == JobKind::Sync
                    && job.payload == finishing.payload
                    && job.state.is_terminal())
            });
        }
        kind => {
            jobs.retain(|job| !(job.kind == kind && job.state.is_terminal()));
        }
    }
}

/// The per-tick sweep: clears every terminal job
pub fn prune_terminal(jobs: &mut Vec<Job>) {
    jobs.retain(|job| !job.state.is_terminal());
}
