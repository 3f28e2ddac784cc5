//! Sync engine
//!
//! Ingests the upstream tree for a tenant. A full sync walks the whole
//! folder tree through the recursive task queue; a single-item sync
//! refreshes one file. Both leave bodies in the content store and the
//! drive tree record in the record store, then announce the change on
//! the event bus. The tenant id doubles as the upstream root folder id.

pub mod fetch;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::drive::{DriveClient, DriveFile, RateLimitedDrive};
use crate::engine::{Container, EngineHandle};
use crate::jobs::{HandlerContext, JobHandler, JobKind};
use crate::ledger::{partitions, RecordError, RecordStore};
use crate::messaging::{EngineEvent, EventBus};
use crate::observability::Metrics;
use crate::queue::{Progress, QueueDownloader};
use crate::storage::{self, ContentStore};
use crate::AnyError;

use fetch::{FetchContext, FetchFolderTask, NodeCollector};

/// The persisted drive tree for a tenant, empty when never synced
pub fn drive_tree(store: &RecordStore, tenant: &str) -> Result<Vec<DriveFile>, RecordError> {
    Ok(store
        .read_record(&partitions::drive_tree_key(tenant))?
        .unwrap_or_default())
}

/// Container and handler for the `sync` and `sync_all` kinds
pub struct SyncEngine {
    drive: Arc<RateLimitedDrive>,
    store: Arc<RecordStore>,
    content: Arc<ContentStore>,
    bus: EventBus,
    concurrency: usize,
    metrics: Arc<Metrics>,
}

impl SyncEngine {
    pub const NAME: &'static str = "sync";

    pub fn new(
        drive: Arc<RateLimitedDrive>,
        store: Arc<RecordStore>,
        content: Arc<ContentStore>,
        bus: EventBus,
        concurrency: usize,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            drive,
            store,
            content,
            bus,
            concurrency,
            metrics,
        })
    }

    /// Walks the tenant's whole tree and regenerates the drive tree
    /// record. Fails only when the root folder itself was unreachable;
    /// partial failures deeper in the tree are logged and tolerated.
    pub async fn run_full<F>(&self, tenant: &str, progress: F) -> Result<(), AnyError>
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        let root = self.drive.get_file(tenant).await?;
        if !root.is_folder() {
            return Err(format!("tenant root is not a folder: {tenant}").into());
        }

        let ctx = FetchContext {
            tenant: tenant.to_string(),
            drive: Arc::clone(&self.drive) as Arc<dyn DriveClient>,
            content: Arc::clone(&self.content),
            collector: NodeCollector::new(),
        };

        let mut downloader = QueueDownloader::new(self.concurrency, Arc::clone(&self.metrics));
        downloader.on_progress_notify(progress);
        downloader.add_task(Box::new(FetchFolderTask {
            ctx: ctx.clone(),
            folder: root,
        }));

        let report = downloader.finished().await;
        if report.root_failed() {
            let reason = report
                .failures
                .iter()
                .find(|failure| failure.root)
                .map(|failure| failure.error.to_string())
                .unwrap_or_else(|| "root task failed".to_string());
            return Err(format!("full sync fetched nothing: {reason}").into());
        }
        if !report.failures.is_empty() {
            warn!(
                tenant,
                failed = report.failures.len(),
                fetched = report.progress.completed,
                "Full sync finished with partial failures"
            );
        }

        let nodes = ctx.collector.into_nodes();
        info!(tenant, nodes = nodes.len(), "Drive tree regenerated");
        self.write_tree(tenant, &nodes)?;
        self.bus.emit(EngineEvent::DriveChanged {
            tenant: tenant.to_string(),
        });
        Ok(())
    }

    /// Refreshes one file's metadata and body and patches its node in
    /// the drive tree record
    pub async fn run_single(&self, tenant: &str, file_id: &str) -> Result<(), AnyError> {
        let file = self.drive.get_file(file_id).await?;
        if file.is_folder() {
            return Err(format!("cannot single-sync a folder: {file_id}").into());
        }
        let body = self.drive.download(file_id).await?;
        self.content
            .upload(&storage::file_key(tenant, file_id), body)
            .await?;

        let mut nodes = drive_tree(&self.store, tenant)?;
        match nodes.iter_mut().find(|node| node.id == file.id) {
            Some(node) => *node = file.clone(),
            None => {
                nodes.push(file.clone());
                nodes.sort_by(|a, b| a.id.cmp(&b.id));
            }
        }
        self.write_tree(tenant, &nodes)?;

        info!(tenant, file = %file.id, version = file.version, "File synced");
        self.bus.emit(EngineEvent::DriveChanged {
            tenant: tenant.to_string(),
        });
        Ok(())
    }

    fn write_tree(&self, tenant: &str, nodes: &[DriveFile]) -> Result<(), RecordError> {
        self.store
            .write_record(&partitions::drive_tree_key(tenant), &nodes)
    }
}

#[async_trait]
impl Container for SyncEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn init(&self, _engine: EngineHandle) -> Result<(), AnyError> {
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[async_trait]
impl JobHandler for SyncEngine {
    async fn perform(&self, ctx: HandlerContext) -> Result<(), AnyError> {
        match ctx.job().kind {
            JobKind::SyncAll => {
                let forward_ctx = ctx.clone();
                self.run_full(ctx.tenant(), move |progress: Progress| {
                    let ctx = forward_ctx.clone();
                    tokio::spawn(async move {
                        ctx.progress(progress.completed, progress.total).await;
                    });
                })
                .await
            }
            JobKind::Sync => {
                let file_id = ctx
                    .payload()
                    .ok_or("sync job without a file id payload")?
                    .to_string();
                self.run_single(ctx.tenant(), &file_id).await
            }
            other => Err(format!("sync engine cannot handle kind: {other}").into()),
        }
    }
}
