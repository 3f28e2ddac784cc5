use std::path::PathBuf;
use std::sync::Arc;

use syncbox::config::{Config, StorageProvider};
use syncbox::drive::changes::ChangeLog;
use syncbox::drive::{DriveApiContainer, MemoryDrive, RateLimitedDrive};
use syncbox::engine::ContainerEngine;
use syncbox::jobs::{scheduler, HandlerRegistry, JobKind, JobManager};
use syncbox::ledger::RecordStore;
use syncbox::messaging::EventBus;
use syncbox::observability::Metrics;
use syncbox::preview::{HtmlRenderer, PreviewEngine};
use syncbox::quota::QuotaLimit;
use syncbox::storage::ContentStore;
use syncbox::sync::SyncEngine;
use syncbox::transform::{PlainTextConverter, TransformEngine};
use syncbox::AnyError;
use tracing::info;

pub async fn run(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<(), AnyError> {
    let mut config = match config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = data_dir {
        config.server.fjall_path = dir.join("records");
        config.storage.root = dir.join("content");
    }

    let store = Arc::new(RecordStore::open(&config.server.fjall_path)?);
    let bus = EventBus::new();
    let metrics = Arc::new(Metrics::new());

    let content = Arc::new(match config.storage.provider {
        StorageProvider::Memory => ContentStore::in_memory(),
        StorageProvider::Local => ContentStore::local(&config.storage.root)?,
    });

    // The bundled upstream is the in-memory client; a deployment syncing a
    // real source swaps in its own DriveClient here.
    let limit = QuotaLimit::new(config.quota.limit, config.quota.window.as_duration());
    let drive = RateLimitedDrive::with_persisted_ledger(
        Arc::new(MemoryDrive::new()),
        Arc::clone(&store),
        limit,
        Arc::clone(&metrics),
    )
    .await?;

    let changes = Arc::new(ChangeLog::new(Arc::clone(&store)));
    let sync = SyncEngine::new(
        Arc::clone(&drive),
        Arc::clone(&store),
        Arc::clone(&content),
        bus.clone(),
        config.downloader.concurrency,
        Arc::clone(&metrics),
    );
    let transform = TransformEngine::new(
        Arc::clone(&store),
        Arc::clone(&content),
        Arc::clone(&changes),
        Arc::new(PlainTextConverter),
        config.scheduler.retry_delay,
    );
    let preview = PreviewEngine::new(
        Arc::clone(&store),
        Arc::clone(&content),
        Arc::new(HtmlRenderer),
    );

    let engine = ContainerEngine::new();
    engine
        .register(DriveApiContainer::new(Arc::clone(&drive)))
        .await?;
    engine.register(sync.clone()).await?;
    engine.register(transform.clone()).await?;
    engine.register(preview.clone()).await?;

    let mut registry = HandlerRegistry::new();
    registry.register(JobKind::Sync, sync.clone());
    registry.register(JobKind::SyncAll, sync.clone());
    registry.register(JobKind::Transform, transform.clone());
    registry.register(JobKind::RenderPreview, preview.clone());

    let manager = JobManager::open(
        config.scheduler.clone(),
        Arc::clone(&store),
        bus.clone(),
        registry,
        Arc::clone(&metrics),
    )?;

    let handle = scheduler::start(Arc::clone(&manager));
    info!(
        tick = %config.scheduler.tick,
        containers = ?engine.names().await,
        "SyncBox running"
    );

    shutdown_signal().await;

    handle.stop();
    engine.flush_all().await;
    store.persist()?;

    Ok(())
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
