use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::jobs::admission::{self, Admission, DiscardReason};
use crate::jobs::registry::{HandlerContext, HandlerRegistry};
use crate::jobs::retention;
use crate::jobs::types::{Job, JobProgress, JobRequest, JobState};
use crate::ledger::{partitions, RecordError, RecordStore};
use crate::messaging::{EngineEvent, EventBus};
use crate::observability::Metrics;
use crate::AnyError;

/// What `schedule` did with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled(Uuid),
    Discarded(DiscardReason),
}

impl ScheduleOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, ScheduleOutcome::Scheduled(_))
    }
}

/// Owner of every tenant job queue
///
/// All queue mutation goes through this type under one lock: admission,
/// the scheduler tick, progress stamping and completion. Handlers run in
/// spawned tasks and report back through methods, never by touching
/// queue state directly. Queue writes are mirrored to the record store
/// and every mutation emits a whole-queue `JobsChanged` snapshot.
pub struct JobManager {
    config: SchedulerConfig,
    queues: Mutex<HashMap<String, Vec<Job>>>,
    store: Arc<RecordStore>,
    bus: EventBus,
    registry: HandlerRegistry,
    metrics: Arc<Metrics>,
}

impl JobManager {
    /// Loads persisted tenant queues and builds the manager. Jobs left
    /// running by an interrupted process are demoted to waiting so their
    /// work runs again.
    pub fn open(
        config: SchedulerConfig,
        store: Arc<RecordStore>,
        bus: EventBus,
        registry: HandlerRegistry,
        metrics: Arc<Metrics>,
    ) -> Result<Arc<Self>, RecordError> {
        let mut queues = HashMap::new();
        for (tenant, mut jobs) in store.read_prefix::<Vec<Job>>(partitions::JOBS_PREFIX)? {
            for job in &mut jobs {
                if job.state == JobState::Running {
                    debug!(tenant = %tenant, title = %job.title, "Demoting interrupted job to waiting");
                    job.state = JobState::Waiting;
                }
            }
            if !jobs.is_empty() {
                queues.insert(tenant, jobs);
            }
        }
        if !queues.is_empty() {
            info!(tenants = queues.len(), "Restored persisted job queues");
        }

        Ok(Arc::new(Self {
            config,
            queues: Mutex::new(queues),
            store,
            bus,
            registry,
            metrics,
        }))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Admission-checked enqueue
    ///
    /// An inadmissible request is a quiet no-op; duplicate scheduling is
    /// an expected race between concurrent triggers, not an error.
    pub async fn schedule(&self, tenant: &str, request: JobRequest) -> ScheduleOutcome {
        let mut queues = self.queues.lock().await;
        let jobs = queues.entry(tenant.to_string()).or_default();

        match admission::admit(jobs, &request) {
            Admission::Discard(reason) => {
                self.metrics.job_discarded();
                debug!(tenant, kind = %request.kind, reason = reason.as_str(), "Job discarded");
                return ScheduleOutcome::Discarded(reason);
            }
            Admission::AdmitReplacingWaiting => {
                jobs.retain(|job| job.state == JobState::Running);
            }
            Admission::Admit => {}
        }

        let job = request.into_job(Utc::now());
        let id = job.id;
        info!(tenant, kind = %job.kind, title = %job.title, "Job scheduled");
        self.metrics.job_scheduled();
        jobs.push(job);
        self.persist_and_emit(tenant, jobs);
        ScheduleOutcome::Scheduled(id)
    }

    /// One tenant's queue, empty when the tenant is unknown
    pub async fn inspect(&self, tenant: &str) -> Vec<Job> {
        self.queues
            .lock()
            .await
            .get(tenant)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every tenant queue, for operational inspection
    pub async fn list_all(&self) -> HashMap<String, Vec<Job>> {
        self.queues.lock().await.clone()
    }

    /// One scheduler pass over every tenant
    ///
    /// Takes the clock as a parameter so tests can step deterministically;
    /// the production loop passes `Utc::now()`.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) {
        let debounce = Duration::milliseconds(self.config.debounce.as_millis() as i64);
        let mut queues = self.queues.lock().await;
        let tenants: Vec<String> = queues.keys().cloned().collect();

        for tenant in tenants {
            let Some(jobs) = queues.get_mut(&tenant) else {
                continue;
            };

            let before = jobs.len();
            retention::prune_terminal(jobs);
            if jobs.is_empty() {
                self.evict_tenant(&mut queues, &tenant);
                continue;
            }
            if jobs.len() != before {
                self.persist_and_emit(&tenant, jobs);
            }

            // let near-simultaneous schedule calls settle before picking
            if let Some(last) = jobs.last() {
                if now - last.created_at < debounce {
                    continue;
                }
            }

            if jobs.iter().any(|job| job.state == JobState::Running) {
                continue;
            }

            let Some(job) = jobs.iter_mut().find(|job| job.is_eligible(now)) else {
                continue;
            };
            job.state = JobState::Running;
            let picked = job.clone();
            self.persist_and_emit(&tenant, jobs);
            self.dispatch(tenant, picked);
        }
    }

    /// Fire-and-forget handler execution; completion comes back through
    /// `complete` on the spawned task
    fn dispatch(self: &Arc<Self>, tenant: String, job: Job) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let run_id = Uuid::new_v4();
            let span =
                tracing::info_span!("job", %run_id, tenant = %tenant, kind = %job.kind);
            async {
                info!(title = %job.title, "Job started");
                let result = match manager.registry.get(job.kind) {
                    Ok(handler) => {
                        let ctx = HandlerContext {
                            manager: Arc::clone(&manager),
                            tenant: tenant.clone(),
                            job: job.clone(),
                        };
                        handler.perform(ctx).await
                    }
                    Err(err) => Err(AnyError::from(err)),
                };
                manager.complete(&tenant, &job, result).await;
            }
            .instrument(span)
            .await;
        });
    }

    async fn complete(&self, tenant: &str, job: &Job, result: Result<(), AnyError>) {
        let mut queues = self.queues.lock().await;
        let Some(jobs) = queues.get_mut(tenant) else {
            warn!(tenant, title = %job.title, "Queue vanished before completion");
            return;
        };

        // prune before the final state lands so the finishing job itself
        // survives until the next sweep
        retention::prune_on_completion(jobs, job);

        let Some(entry) = jobs.iter_mut().find(|candidate| candidate.id == job.id) else {
            warn!(tenant, title = %job.title, "Job vanished before completion");
            return;
        };
        entry.finished_at = Some(Utc::now());
        match result {
            Ok(()) => {
                entry.state = JobState::Done;
                self.metrics.job_completed();
                info!(title = %entry.title, "Job done");
            }
            Err(err) => {
                entry.state = JobState::Failed;
                entry.error = Some(err.to_string());
                self.metrics.job_failed();
                error!(title = %entry.title, error = %err, "Job failed");
            }
        }
        self.persist_and_emit(tenant, jobs);
    }

    /// Stamps live progress onto a running job; observers get the update
    /// through the event bus, no disk write per report
    pub(crate) async fn update_progress(&self, tenant: &str, job_id: Uuid, progress: JobProgress) {
        let mut queues = self.queues.lock().await;
        let Some(jobs) = queues.get_mut(tenant) else {
            return;
        };
        let Some(job) = jobs
            .iter_mut()
            .find(|job| job.id == job_id && job.state == JobState::Running)
        else {
            return;
        };
        job.progress = Some(progress);
        self.bus.emit(EngineEvent::JobsChanged {
            tenant: tenant.to_string(),
            jobs: jobs.clone(),
        });
    }

    fn persist_and_emit(&self, tenant: &str, jobs: &[Job]) {
        if let Err(err) = self.store.write_record(&partitions::jobs_key(tenant), &jobs) {
            warn!(tenant, error = %err, "Job queue write failed, state kept in memory");
        }
        self.bus.emit(EngineEvent::JobsChanged {
            tenant: tenant.to_string(),
            jobs: jobs.to_vec(),
        });
    }

    fn evict_tenant(&self, queues: &mut HashMap<String, Vec<Job>>, tenant: &str) {
        queues.remove(tenant);
        if let Err(err) = self.store.delete_record(&partitions::jobs_key(tenant)) {
            warn!(tenant, error = %err, "Job queue delete failed");
        }
        self.bus.emit(EngineEvent::JobsChanged {
            tenant: tenant.to_string(),
            jobs: Vec::new(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    use crate::jobs::registry::JobHandler;
    use crate::jobs::types::JobKind;

    use super::*;

    struct OkHandler;

    #[async_trait]
    impl JobHandler for OkHandler {
        async fn perform(&self, ctx: HandlerContext) -> Result<(), AnyError> {
            ctx.progress(0, 1).await;
            ctx.progress(1, 1).await;
            Ok(())
        }
    }

    struct FailHandler;

    #[async_trait]
    impl JobHandler for FailHandler {
        async fn perform(&self, _ctx: HandlerContext) -> Result<(), AnyError> {
            Err("handler exploded".into())
        }
    }

    /// Holds the job in running state until a permit is added
    struct GatedHandler {
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl JobHandler for GatedHandler {
        async fn perform(&self, _ctx: HandlerContext) -> Result<(), AnyError> {
            self.release.acquire().await?.forget();
            Ok(())
        }
    }

    fn test_registry(release: &Arc<Semaphore>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(JobKind::Sync, Arc::new(OkHandler));
        registry.register(JobKind::SyncAll, Arc::new(OkHandler));
        registry.register(JobKind::Transform, Arc::new(FailHandler));
        registry.register(
            JobKind::Commit,
            Arc::new(GatedHandler {
                release: Arc::clone(release),
            }),
        );
        registry
    }

    fn test_manager() -> (Arc<JobManager>, Arc<RecordStore>, Arc<Semaphore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("records")).unwrap());
        let release = Arc::new(Semaphore::new(0));
        let manager = JobManager::open(
            SchedulerConfig::default(),
            Arc::clone(&store),
            EventBus::new(),
            test_registry(&release),
            Arc::new(Metrics::new()),
        )
        .unwrap();
        (manager, store, release, dir)
    }

    fn past_debounce() -> DateTime<Utc> {
        Utc::now() + Duration::seconds(2)
    }

    async fn wait_until<F>(manager: &Arc<JobManager>, tenant: &str, predicate: F)
    where
        F: Fn(&[Job]) -> bool,
    {
        for _ in 0..200 {
            if predicate(&manager.inspect(tenant).await) {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("queue never reached the expected shape");
    }

    #[tokio::test]
    async fn schedule_persists_the_queue() {
        let (manager, store, _release, _dir) = test_manager();

        let outcome = manager
            .schedule("t1", JobRequest::new(JobKind::Sync, "Sync file").with_payload("f1"))
            .await;
        assert!(outcome.is_scheduled());

        let persisted: Vec<Job> = store
            .read_record(&partitions::jobs_key("t1"))
            .unwrap()
            .unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].state, JobState::Waiting);
        assert_eq!(persisted[0].payload.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn duplicate_sync_is_a_no_op() {
        let (manager, _store, _release, _dir) = test_manager();
        let request = JobRequest::new(JobKind::Sync, "Sync file").with_payload("f1");

        assert!(manager.schedule("t1", request.clone()).await.is_scheduled());
        assert_eq!(
            manager.schedule("t1", request).await,
            ScheduleOutcome::Discarded(DiscardReason::DuplicatePayload)
        );
        assert_eq!(manager.inspect("t1").await.len(), 1);
    }

    #[tokio::test]
    async fn full_sync_discards_queued_partial_work() {
        let (manager, _store, _release, _dir) = test_manager();
        manager
            .schedule("t1", JobRequest::new(JobKind::Sync, "Sync f1").with_payload("f1"))
            .await;
        manager
            .schedule("t1", JobRequest::new(JobKind::Sync, "Sync f2").with_payload("f2"))
            .await;

        let outcome = manager
            .schedule("t1", JobRequest::new(JobKind::SyncAll, "Full sync"))
            .await;
        assert!(outcome.is_scheduled());

        let jobs = manager.inspect("t1").await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::SyncAll);
    }

    #[tokio::test]
    async fn tick_waits_out_the_debounce_window() {
        let (manager, _store, _release, _dir) = test_manager();
        manager
            .schedule("t1", JobRequest::new(JobKind::Sync, "Sync f1").with_payload("f1"))
            .await;

        manager.tick(Utc::now()).await;
        assert_eq!(manager.inspect("t1").await[0].state, JobState::Waiting);

        manager.tick(past_debounce()).await;
        wait_until(&manager, "t1", |jobs| {
            jobs.first().is_some_and(|job| job.state == JobState::Done)
        })
        .await;
    }

    #[tokio::test]
    async fn at_most_one_job_runs_per_tenant() {
        let (manager, _store, release, _dir) = test_manager();
        manager
            .schedule("t1", JobRequest::new(JobKind::Commit, "Commit 1"))
            .await;
        manager
            .schedule("t1", JobRequest::new(JobKind::Commit, "Commit 2"))
            .await;

        manager.tick(past_debounce()).await;
        manager.tick(past_debounce()).await;

        let jobs = manager.inspect("t1").await;
        let running = jobs
            .iter()
            .filter(|job| job.state == JobState::Running)
            .count();
        assert_eq!(running, 1);
        assert_eq!(jobs[1].state, JobState::Waiting);

        release.add_permits(1);
        wait_until(&manager, "t1", |jobs| {
            jobs.first().is_some_and(|job| job.state == JobState::Done)
        })
        .await;

        manager.tick(past_debounce()).await;
        release.add_permits(1);
        wait_until(&manager, "t1", |jobs| {
            jobs.iter().any(|job| job.title == "Commit 2" && job.state == JobState::Done)
        })
        .await;
    }

    #[tokio::test]
    async fn delayed_job_is_skipped_until_due() {
        let (manager, _store, _release, _dir) = test_manager();
        let now = Utc::now();
        manager
            .schedule(
                "t1",
                JobRequest::new(JobKind::Sync, "Retry sync")
                    .with_payload("f1")
                    .not_before(now + Duration::seconds(10)),
            )
            .await;

        manager.tick(now + Duration::seconds(5)).await;
        assert_eq!(manager.inspect("t1").await[0].state, JobState::Waiting);

        manager.tick(now + Duration::seconds(11)).await;
        wait_until(&manager, "t1", |jobs| {
            jobs.first().is_some_and(|job| job.state == JobState::Done)
        })
        .await;
    }

    #[tokio::test]
    async fn failed_handler_marks_the_job_failed() {
        let (manager, _store, _release, _dir) = test_manager();
        manager
            .schedule("t1", JobRequest::new(JobKind::Transform, "Convert"))
            .await;

        manager.tick(past_debounce()).await;
        wait_until(&manager, "t1", |jobs| {
            jobs.first().is_some_and(|job| job.state == JobState::Failed)
        })
        .await;

        let jobs = manager.inspect("t1").await;
        assert!(jobs[0].error.as_deref().unwrap().contains("handler exploded"));
        assert!(jobs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn unregistered_kind_fails_at_dispatch() {
        let (manager, _store, _release, _dir) = test_manager();
        manager
            .schedule("t1", JobRequest::new(JobKind::RunAction, "Trigger build"))
            .await;

        manager.tick(past_debounce()).await;
        wait_until(&manager, "t1", |jobs| {
            jobs.first().is_some_and(|job| job.state == JobState::Failed)
        })
        .await;

        let jobs = manager.inspect("t1").await;
        assert!(jobs[0].error.as_deref().unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn terminal_jobs_are_pruned_and_the_tenant_evicted() {
        let (manager, store, _release, _dir) = test_manager();
        manager
            .schedule("t1", JobRequest::new(JobKind::Sync, "Sync f1").with_payload("f1"))
            .await;
        manager.tick(past_debounce()).await;
        wait_until(&manager, "t1", |jobs| {
            jobs.first().is_some_and(|job| job.state == JobState::Done)
        })
        .await;

        manager.tick(past_debounce()).await;

        assert!(manager.inspect("t1").await.is_empty());
        assert!(manager.list_all().await.is_empty());
        let persisted: Option<Vec<Job>> = store.read_record(&partitions::jobs_key("t1")).unwrap();
        assert!(persisted.is_none());
    }

    #[tokio::test]
    async fn progress_is_visible_while_running() {
        let (manager, _store, _release, _dir) = test_manager();
        let mut events = manager.bus.subscribe();
        manager
            .schedule("t1", JobRequest::new(JobKind::Sync, "Sync f1").with_payload("f1"))
            .await;
        manager.tick(past_debounce()).await;
        wait_until(&manager, "t1", |jobs| {
            jobs.first().is_some_and(|job| job.state == JobState::Done)
        })
        .await;

        let mut saw_progress = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::JobsChanged { jobs, .. } = event {
                if jobs
                    .first()
                    .and_then(|job| job.progress)
                    .is_some_and(|p| p.completed == 1 && p.total == 1)
                {
                    saw_progress = true;
                }
            }
        }
        assert!(saw_progress);
    }

    #[tokio::test]
    async fn reopened_manager_demotes_interrupted_jobs() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("records")).unwrap());
        let mut job = JobRequest::new(JobKind::Sync, "Sync f1")
            .with_payload("f1")
            .into_job(Utc::now());
        job.state = JobState::Running;
        store
            .write_record(&partitions::jobs_key("t1"), &vec![job])
            .unwrap();

        let release = Arc::new(Semaphore::new(0));
        let manager = JobManager::open(
            SchedulerConfig::default(),
            Arc::clone(&store),
            EventBus::new(),
            test_registry(&release),
            Arc::new(Metrics::new()),
        )
        .unwrap();

        let jobs = manager.inspect("t1").await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state, JobState::Waiting);
    }

    #[tokio::test]
    async fn queue_round_trips_through_the_store() {
        let (manager, store, _release, _dir) = test_manager();
        manager
            .schedule("t1", JobRequest::new(JobKind::Sync, "Sync f1").with_payload("f1"))
            .await;
        let before = manager.inspect("t1").await;

        let persisted: Vec<Job> = store
            .read_record(&partitions::jobs_key("t1"))
            .unwrap()
            .unwrap();
        assert_eq!(persisted.len(), before.len());
        assert_eq!(persisted[0].id, before[0].id);
        // timestamps are stored at millisecond precision
        assert_eq!(
            persisted[0].created_at.timestamp_millis(),
            before[0].created_at.timestamp_millis()
        );
        assert_eq!(persisted[0].kind, before[0].kind);
    }
}
