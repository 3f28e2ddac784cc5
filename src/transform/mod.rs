//! Transform engine
//!
//! Turns fetched bodies into local content. One pass walks the drive
//! tree, converts every file through the [`Converter`] seam, writes the
//! output under `{tenant}/content/` and regenerates the content tree
//! record. The content tree carries each node's upstream version, which
//! is what the retry scan compares against the change log afterwards:
//! any change the pass should have captured but did not becomes a
//! delayed single-item sync. That scan is the self-healing answer to
//! races with in-flight upstream edits.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::drive::changes::{Change, ChangeLog};
use crate::drive::DriveFile;
use crate::engine::{Container, EngineHandle};
use crate::humanize::HumanDuration;
use crate::jobs::{HandlerContext, JobHandler, JobKind, JobRequest};
use crate::ledger::{partitions, RecordError, RecordStore};
use crate::storage::{self, ContentStore, StorageError};
use crate::sync;
use crate::AnyError;

/// One converted document in the content tree record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: String,
    pub title: String,
    /// Upstream version the conversion was based on
    pub version: i64,
    /// Content store key of the converted output
    pub key: String,
}

/// The persisted content tree for a tenant, empty when never transformed
pub fn content_tree(store: &RecordStore, tenant: &str) -> Result<Vec<ContentNode>, RecordError> {
    Ok(store
        .read_record(&partitions::content_tree_key(tenant))?
        .unwrap_or_default())
}

/// Converts one fetched body into local content
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, node: &DriveFile, body: Bytes) -> Result<Bytes, AnyError>;
}

/// Pass-through converter; real document conversion plugs in here
pub struct PlainTextConverter;

#[async_trait]
impl Converter for PlainTextConverter {
    async fn convert(&self, _node: &DriveFile, body: Bytes) -> Result<Bytes, AnyError> {
        Ok(body)
    }
}

/// Container and handler for the `transform` kind
pub struct TransformEngine {
    store: Arc<RecordStore>,
    content: Arc<ContentStore>,
    changes: Arc<ChangeLog>,
    converter: Arc<dyn Converter>,
    retry_delay: HumanDuration,
}

impl TransformEngine {
    pub const NAME: &'static str = "transform";

    pub fn new(
        store: Arc<RecordStore>,
        content: Arc<ContentStore>,
        changes: Arc<ChangeLog>,
        converter: Arc<dyn Converter>,
        retry_delay: HumanDuration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            content,
            changes,
            converter,
            retry_delay,
        })
    }

    /// Converts every file in the drive tree and regenerates the content
    /// tree record. A file whose fetched body is missing is skipped; the
    /// retry scan brings it back once a change is recorded for it.
    pub async fn convert_all<F>(&self, tenant: &str, progress: F) -> Result<Vec<ContentNode>, AnyError>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let files: Vec<DriveFile> = sync::drive_tree(&self.store, tenant)?
            .into_iter()
            .filter(|node| !node.is_folder())
            .collect();

        let total = files.len();
        let mut nodes = Vec::with_capacity(total);
        progress(0, total);

        for (done, file) in files.into_iter().enumerate() {
            let body = match self
                .content
                .download(&storage::file_key(tenant, &file.id))
                .await
            {
                Ok(body) => body,
                Err(StorageError::NotFound(_)) => {
                    warn!(tenant, file = %file.id, "Fetched body missing, skipping conversion");
                    progress(done + 1, total);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let converted = self.converter.convert(&file, body).await?;
            let key = storage::content_key(tenant, &file.id);
            self.content.upload(&key, converted).await?;
            nodes.push(ContentNode {
                id: file.id,
                title: file.name,
                version: file.version,
                key,
            });
            progress(done + 1, total);
        }

        self.store
            .write_record(&partitions::content_tree_key(tenant), &nodes)?;
        info!(tenant, converted = nodes.len(), "Content tree regenerated");
        Ok(nodes)
    }

    /// Compares recorded upstream changes against the freshly written
    /// content tree. Entries the pass captured are forgotten; entries
    /// still newer than their converted version come back as retry
    /// candidates. A change with no converted node at all counts as
    /// never captured.
    pub fn retry_candidates(
        &self,
        tenant: &str,
        tree: &[ContentNode],
    ) -> Result<Vec<Change>, AnyError> {
        let mut stale = Vec::new();
        for change in self.changes.list(tenant)? {
            let local_version = tree
                .iter()
                .find(|node| node.id == change.file_id)
                .map(|node| node.version)
                .unwrap_or(0);
            if local_version < change.version {
                debug!(
                    tenant,
                    file = %change.file_id,
                    local = local_version,
                    upstream = change.version,
                    "Change not yet captured"
                );
                stale.push(change);
            } else {
                self.changes.forget(tenant, &change.file_id, local_version)?;
            }
        }
        Ok(stale)
    }
}

#[async_trait]
impl Container for TransformEngine {
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
impl JobHandler for TransformEngine {
    async fn perform(&self, ctx: HandlerContext) -> Result<(), AnyError> {
        if ctx.job().kind != JobKind::Transform {
            return Err(format!("transform engine cannot handle kind: {}", ctx.job().kind).into());
        }

        let forward_ctx = ctx.clone();
        let tree = self
            .convert_all(ctx.tenant(), move |completed, total| {
                let ctx = forward_ctx.clone();
                tokio::spawn(async move {
                    ctx.progress(completed, total).await;
                });
            })
            .await?;

        let not_before = Utc::now() + Duration::milliseconds(self.retry_delay.as_millis() as i64);
        for change in self.retry_candidates(ctx.tenant(), &tree)? {
            let request = JobRequest::new(
                JobKind::Sync,
                format!("Retry syncing file: {}", change.title),
            )
            .with_payload(change.file_id)
            .not_before(not_before);
            ctx.schedule_followup(request).await;
        }
        Ok(())
    }
}
