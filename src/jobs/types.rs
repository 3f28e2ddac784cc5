use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a job does; fixed for the job's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch one upstream item
    Sync,
    /// Fetch the whole tenant tree
    SyncAll,
    /// Convert fetched bodies into local content
    Transform,
    /// Render converted content into previews
    RenderPreview,
    Commit,
    Push,
    RunAction,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Sync => "sync",
            JobKind::SyncAll => "sync_all",
            JobKind::Transform => "transform",
            JobKind::RenderPreview => "render_preview",
            JobKind::Commit => "commit",
            JobKind::Push => "push",
            JobKind::RunAction => "run_action",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Running,
    Done,
    Failed,
}

impl JobState {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counters stamped onto a running job while its handler reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub completed: usize,
    pub total: usize,
}

/// One scheduled unit of work in a tenant's queue
///
/// Timestamps are serialized as epoch milliseconds, matching the wire
/// format observers already consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub start_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Eligible to start: waiting, and any not-before delay has passed
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting
            && self.start_after.map_or(true, |not_before| not_before <= now)
    }
}

/// What callers hand to `schedule`; the manager stamps identity, state
/// and arrival time on admission
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub kind: JobKind,
    pub title: String,
    pub payload: Option<String>,
    pub start_after: Option<DateTime<Utc>>,
}

impl JobRequest {
    pub fn new(kind: JobKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            payload: None,
            start_after: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.start_after = Some(at);
        self
    }

    pub(crate) fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::now_v7(),
            kind: self.kind,
            state: JobState::Waiting,
            title: self.title,
            payload: self.payload,
            created_at: now,
            finished_at: None,
            start_after: self.start_after,
            progress: None,
            error: None,
        }
    }
}
