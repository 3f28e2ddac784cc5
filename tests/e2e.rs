//! End-to-end integration tests for SyncBox
//!
//! These tests drive the full pipeline through the public library API:
//! 1. Schedule jobs on the JobManager
//! 2. The scheduler loop picks them up and dispatches the registered engines
//! 3. Engines fetch from the in-memory drive through the quota limiter
//! 4. Converted content and rendered previews land in the content store
//! 5. Verify queue snapshots, persisted records and emitted events
//!
//! Everything runs in-process against a tempdir-backed record store;
//! no external services are required.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tempfile::TempDir;
use tokio::time::sleep;

use syncbox::config::SchedulerConfig;
use syncbox::drive::changes::{Change, ChangeLog};
use syncbox::drive::{DriveClient, MemoryDrive, RateLimitedDrive};
use syncbox::humanize::HumanDuration;
use syncbox::jobs::{
    scheduler, DiscardReason, HandlerRegistry, JobKind, JobManager, JobRequest, JobState,
    ScheduleOutcome,
};
use syncbox::ledger::{partitions, RecordStore};
use syncbox::messaging::{EngineEvent, EventBus};
use syncbox::observability::Metrics;
use syncbox::preview::{HtmlRenderer, PreviewEngine};
use syncbox::quota::{QuotaLedger, QuotaLimit, QuotaLimiter};
use syncbox::storage::{self, ContentStore};
use syncbox::sync::{self, SyncEngine};
use syncbox::transform::{self, PlainTextConverter, TransformEngine};

const TENANT: &str = "t1";

/// Test context wiring the whole engine stack in one process
struct PipelineContext {
    manager: Arc<JobManager>,
    drive: Arc<MemoryDrive>,
    store: Arc<RecordStore>,
    content: Arc<ContentStore>,
    changes: Arc<ChangeLog>,
    bus: EventBus,
    _dir: TempDir,
}

impl PipelineContext {
    /// Build the full stack the way the serve bootstrap does, with a
    /// seeded in-memory upstream and test-friendly timings
    async fn setup(config: SchedulerConfig) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(RecordStore::open(dir.path().join("records")).expect("record store"));
        let bus = EventBus::new();
        let metrics = Arc::new(Metrics::new());
        let content = Arc::new(ContentStore::in_memory());

        let drive = Arc::new(MemoryDrive::new());
        drive.add_folder(TENANT, "Workspace", None);
        drive.add_folder("docs", "Docs", Some(TENANT));
        drive.add_file("readme", "ReadMe", Some(TENANT), "hello world");
        drive.add_file("plan", "Plan", Some("docs"), "quarterly plan");

        let limited = RateLimitedDrive::with_persisted_ledger(
            Arc::clone(&drive) as Arc<dyn DriveClient>,
            Arc::clone(&store),
            QuotaLimit::new(100, Duration::from_secs(10)),
            Arc::clone(&metrics),
        )
        .await
        .expect("rate limited drive");

        let changes = Arc::new(ChangeLog::new(Arc::clone(&store)));
        let sync_engine = SyncEngine::new(
            Arc::clone(&limited),
            Arc::clone(&store),
            Arc::clone(&content),
            bus.clone(),
            2,
            Arc::clone(&metrics),
        );
        let transform_engine = TransformEngine::new(
            Arc::clone(&store),
            Arc::clone(&content),
            Arc::clone(&changes),
            Arc::new(PlainTextConverter),
            config.retry_delay,
        );
        let preview_engine = PreviewEngine::new(
            Arc::clone(&store),
            Arc::clone(&content),
            Arc::new(HtmlRenderer),
        );

        let mut registry = HandlerRegistry::new();
        registry.register(JobKind::Sync, sync_engine.clone());
        registry.register(JobKind::SyncAll, sync_engine.clone());
        registry.register(JobKind::Transform, transform_engine.clone());
        registry.register(JobKind::RenderPreview, preview_engine.clone());

        let manager = JobManager::open(
            config,
            Arc::clone(&store),
            bus.clone(),
            registry,
            metrics,
        )
        .expect("job manager");

        Self {
            manager,
            drive,
            store,
            content,
            changes,
            bus,
            _dir: dir,
        }
    }

    /// Fast loop timings for tests that run the scheduler
    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            tick: HumanDuration(20),
            debounce: HumanDuration(0),
            retry_delay: HumanDuration(150),
        }
    }

    /// Poll until the tenant queue satisfies the predicate
    async fn wait_for_queue<F>(&self, predicate: F)
    where
        F: Fn(&[syncbox::jobs::Job]) -> bool,
    {
        for _ in 0..500 {
            if predicate(&self.manager.inspect(TENANT).await) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never reached the expected shape");
    }

    async fn wait_for_empty_queue(&self) {
        self.wait_for_queue(|jobs| jobs.is_empty()).await;
    }
}

#[tokio::test]
async fn full_sync_pipeline_end_to_end() {
    let ctx = PipelineContext::setup(PipelineContext::fast_config()).await;
    let mut events = ctx.bus.subscribe();

    let handle = scheduler::start(Arc::clone(&ctx.manager));
    let outcome = ctx
        .manager
        .schedule(TENANT, JobRequest::new(JobKind::SyncAll, "Full sync"))
        .await;
    assert!(outcome.is_scheduled());

    ctx.wait_for_empty_queue().await;
    handle.stop();

    // The whole tree landed in the drive tree record, sorted by id
    let tree = sync::drive_tree(&ctx.store, TENANT).expect("drive tree");
    let ids: Vec<&str> = tree.iter().map(|node| node.id.as_str()).collect();
    assert_eq!(ids, vec!["docs", "plan", "readme", TENANT]);

    // File bodies were fetched into the content store
    let readme = ctx
        .content
        .download(&storage::file_key(TENANT, "readme"))
        .await
        .expect("readme body");
    assert_eq!(readme.as_ref(), b"hello world");

    // Observers saw the job run, progress while running, the drive
    // change and finally the empty queue
    let mut saw_running = false;
    let mut saw_progress = false;
    let mut saw_done = false;
    let mut saw_drive_changed = false;
    let mut last_jobs_len = usize::MAX;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::JobsChanged { jobs, .. } => {
                saw_running |= jobs.iter().any(|job| job.state == JobState::Running);
                saw_done |= jobs.iter().any(|job| job.state == JobState::Done);
                saw_progress |= jobs.iter().any(|job| job.progress.is_some());
                last_jobs_len = jobs.len();
            }
            EngineEvent::DriveChanged { tenant } => {
                assert_eq!(tenant, TENANT);
                saw_drive_changed = true;
            }
        }
    }
    assert!(saw_running, "never observed the job running");
    assert!(saw_progress, "never observed progress on the running job");
    assert!(saw_done, "never observed the job done");
    assert!(saw_drive_changed, "never observed the drive change");
    assert_eq!(last_jobs_len, 0, "final snapshot should be the empty queue");

    // The persisted queue record is gone once the tenant is evicted
    let persisted: Option<Vec<syncbox::jobs::Job>> = ctx
        .store
        .read_record(&partitions::jobs_key(TENANT))
        .expect("read queue record");
    assert!(persisted.is_none());
}

#[tokio::test]
async fn admission_dedups_without_running_anything() {
    let ctx = PipelineContext::setup(SchedulerConfig::default()).await;

    let first = ctx
        .manager
        .schedule(
            TENANT,
            JobRequest::new(JobKind::Sync, "Sync readme").with_payload("readme"),
        )
        .await;
    assert!(first.is_scheduled());

    // Same payload again is a quiet no-op
    let duplicate = ctx
        .manager
        .schedule(
            TENANT,
            JobRequest::new(JobKind::Sync, "Sync readme").with_payload("readme"),
        )
        .await;
    assert_eq!(
        duplicate,
        ScheduleOutcome::Discarded(DiscardReason::DuplicatePayload)
    );
    assert_eq!(ctx.manager.inspect(TENANT).await.len(), 1);

    // A full sync supersedes the waiting single-item job
    assert!(ctx
        .manager
        .schedule(TENANT, JobRequest::new(JobKind::SyncAll, "Full sync"))
        .await
        .is_scheduled());
    let jobs = ctx.manager.inspect(TENANT).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::SyncAll);

    // While it is pending, both another full sync and any single-item
    // sync are discarded
    assert_eq!(
        ctx.manager
            .schedule(TENANT, JobRequest::new(JobKind::SyncAll, "Full sync"))
            .await,
        ScheduleOutcome::Discarded(DiscardReason::FullSyncPending)
    );
    assert_eq!(
        ctx.manager
            .schedule(
                TENANT,
                JobRequest::new(JobKind::Sync, "Sync readme").with_payload("readme"),
            )
            .await,
        ScheduleOutcome::Discarded(DiscardReason::FullSyncPending)
    );
    assert_eq!(ctx.manager.inspect(TENANT).await.len(), 1);
}

#[tokio::test]
async fn duplicate_burst_reaches_the_upstream_once() {
    let ctx = PipelineContext::setup(PipelineContext::fast_config()).await;

    // Two identical triggers land back to back, before any tick
    ctx.manager
        .schedule(
            TENANT,
            JobRequest::new(JobKind::Sync, "Sync readme").with_payload("readme"),
        )
        .await;
    ctx.manager
        .schedule(
            TENANT,
            JobRequest::new(JobKind::Sync, "Sync readme").with_payload("readme"),
        )
        .await;

    let handle = scheduler::start(Arc::clone(&ctx.manager));
    ctx.wait_for_empty_queue().await;
    handle.stop();

    // Exactly one single-item sync ran: one metadata call plus one body
    assert_eq!(ctx.drive.calls(), 2);
    let body = ctx
        .content
        .download(&storage::file_key(TENANT, "readme"))
        .await
        .expect("readme body");
    assert_eq!(body.as_ref(), b"hello world");
}

#[tokio::test]
async fn transform_and_preview_follow_the_sync() {
    let ctx = PipelineContext::setup(PipelineContext::fast_config()).await;
    let handle = scheduler::start(Arc::clone(&ctx.manager));

    ctx.manager
        .schedule(TENANT, JobRequest::new(JobKind::SyncAll, "Full sync"))
        .await;
    ctx.wait_for_empty_queue().await;

    ctx.manager
        .schedule(TENANT, JobRequest::new(JobKind::Transform, "Convert content"))
        .await;
    ctx.wait_for_empty_queue().await;

    ctx.manager
        .schedule(
            TENANT,
            JobRequest::new(JobKind::RenderPreview, "Render previews"),
        )
        .await;
    ctx.wait_for_empty_queue().await;
    handle.stop();

    // Converted output mirrors the fetched bodies
    let tree = transform::content_tree(&ctx.store, TENANT).expect("content tree");
    assert_eq!(tree.len(), 2);
    assert!(tree.iter().all(|node| node.version == 1));
    let converted = ctx
        .content
        .download(&storage::content_key(TENANT, "readme"))
        .await
        .expect("converted readme");
    assert_eq!(converted.as_ref(), b"hello world");

    // Previews are rendered HTML with the document title
    let preview = ctx
        .content
        .download(&storage::preview_key(TENANT, "readme"))
        .await
        .expect("readme preview");
    let html = String::from_utf8(preview.to_vec()).expect("utf8 preview");
    assert!(html.contains("<title>ReadMe</title>"));
    assert!(html.contains("hello world"));
}

#[tokio::test]
async fn missed_upstream_edit_heals_through_the_retry_scan() {
    let ctx = PipelineContext::setup(PipelineContext::fast_config()).await;
    let handle = scheduler::start(Arc::clone(&ctx.manager));

    ctx.manager
        .schedule(TENANT, JobRequest::new(JobKind::SyncAll, "Full sync"))
        .await;
    ctx.wait_for_empty_queue().await;

    // An upstream edit lands after the sync captured version 1
    let version = ctx.drive.update_body("readme", "hello again").expect("readme exists");
    assert_eq!(version, 2);
    ctx.changes
        .record(
            TENANT,
            vec![Change {
                file_id: "readme".to_string(),
                title: "ReadMe".to_string(),
                version,
                changed_at: Utc::now(),
            }],
        )
        .expect("record change");

    // The conversion pass notices the stale version and schedules a
    // delayed single-item sync for the file
    ctx.manager
        .schedule(TENANT, JobRequest::new(JobKind::Transform, "Convert content"))
        .await;
    ctx.wait_for_queue(|jobs| {
        jobs.iter().any(|job| {
            job.kind == JobKind::Sync
                && job.payload.as_deref() == Some("readme")
                && job.start_after.is_some()
        })
    })
    .await;

    // Once the delay passes the retry runs and refreshes the tree
    ctx.wait_for_empty_queue().await;
    let tree = sync::drive_tree(&ctx.store, TENANT).expect("drive tree");
    let readme = tree.iter().find(|node| node.id == "readme").expect("readme node");
    assert_eq!(readme.version, 2);
    let body = ctx
        .content
        .download(&storage::file_key(TENANT, "readme"))
        .await
        .expect("readme body");
    assert_eq!(body.as_ref(), b"hello again");

    // A second conversion pass catches up and clears the change log
    ctx.manager
        .schedule(TENANT, JobRequest::new(JobKind::Transform, "Convert content"))
        .await;
    ctx.wait_for_empty_queue().await;
    handle.stop();

    assert!(ctx.changes.list(TENANT).expect("change list").is_empty());
    let converted = ctx
        .content
        .download(&storage::content_key(TENANT, "readme"))
        .await
        .expect("converted readme");
    assert_eq!(converted.as_ref(), b"hello again");
}

#[tokio::test]
async fn quota_limiter_holds_the_trailing_window_under_contention() {
    let limiter = Arc::new(QuotaLimiter::new(
        QuotaLimit::new(5, Duration::from_millis(1000)),
        QuotaLedger::default(),
        Arc::new(Metrics::new()),
    ));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let limiter = Arc::clone(&limiter);
        tasks.push(tokio::spawn(async move {
            limiter.acquire().await;
            Instant::now()
        }));
    }

    let mut instants = Vec::new();
    for task in tasks {
        instants.push(task.await.expect("acquire task"));
    }
    instants.sort();

    // The first five permits clear immediately, the sixth only after the
    // first permit has left the trailing window
    assert!(
        instants[4].duration_since(instants[0]) < Duration::from_millis(500),
        "first five permits should not wait"
    );
    assert!(
        instants[5].duration_since(instants[0]) >= Duration::from_millis(900),
        "sixth permit cleared before the window had passed"
    );
}

#[tokio::test]
async fn restart_restores_the_queue_and_the_quota_ledger() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("records");

    let (job_before, ledger_before) = {
        let store = Arc::new(RecordStore::open(&path).expect("record store"));
        let drive = Arc::new(MemoryDrive::new());
        drive.add_folder(TENANT, "Workspace", None);
        let limited = RateLimitedDrive::with_persisted_ledger(
            Arc::clone(&drive) as Arc<dyn DriveClient>,
            Arc::clone(&store),
            QuotaLimit::new(10, Duration::from_secs(60)),
            Arc::new(Metrics::new()),
        )
        .await
        .expect("rate limited drive");

        // Consume permits so the ledger has history worth keeping
        limited.get_file(TENANT).await.expect("get_file");
        limited.get_file(TENANT).await.expect("get_file");

        let manager = JobManager::open(
            SchedulerConfig::default(),
            Arc::clone(&store),
            EventBus::new(),
            HandlerRegistry::new(),
            Arc::new(Metrics::new()),
        )
        .expect("job manager");
        manager
            .schedule(TENANT, JobRequest::new(JobKind::SyncAll, "Full sync"))
            .await;

        let job = ctx_job(&manager).await;
        let ledger = limited.limiter().ledger().await;
        store.persist().expect("persist");
        (job, ledger)
    };

    // A fresh process over the same directory sees the same state
    let store = Arc::new(RecordStore::open(&path).expect("reopened record store"));
    let manager = JobManager::open(
        SchedulerConfig::default(),
        Arc::clone(&store),
        EventBus::new(),
        HandlerRegistry::new(),
        Arc::new(Metrics::new()),
    )
    .expect("reopened job manager");

    let job_after = ctx_job(&manager).await;
    assert_eq!(job_after.id, job_before.id);
    assert_eq!(job_after.kind, job_before.kind);
    // timestamps are stored at millisecond precision
    assert_eq!(
        job_after.created_at.timestamp_millis(),
        job_before.created_at.timestamp_millis()
    );
    assert_eq!(job_after.state, JobState::Waiting);

    let ledger_after: QuotaLedger = store
        .read_record(&partitions::quota_key())
        .expect("read ledger")
        .expect("ledger present");
    assert_eq!(ledger_after, ledger_before);
}

async fn ctx_job(manager: &Arc<JobManager>) -> syncbox::jobs::Job {
    let jobs = manager.inspect(TENANT).await;
    assert_eq!(jobs.len(), 1);
    jobs[0].clone()
}
