//! Fetch tasks
//!
//! A folder task lists its folder and returns one child task per entry;
//! a file task downloads the body into the content store. Every task
//! records what it fetched in a collector shared across the run, and the
//! tree is regenerated from that collector once the queue drains.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::drive::{DriveClient, DriveFile};
use crate::queue::QueueTask;
use crate::storage::{self, ContentStore};
use crate::AnyError;

/// Nodes fetched by one sync run
#[derive(Clone, Default)]
pub struct NodeCollector {
    nodes: Arc<Mutex<Vec<DriveFile>>>,
}

impl NodeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, node: DriveFile) {
        match self.nodes.lock() {
            Ok(mut nodes) => nodes.push(node),
            Err(poisoned) => poisoned.into_inner().push(node),
        }
    }

    /// Collected nodes, sorted by id for a stable tree record
    pub fn into_nodes(self) -> Vec<DriveFile> {
        let mut nodes = match self.nodes.lock() {
            Ok(mut nodes) => std::mem::take(&mut *nodes),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}

/// Shared wiring handed to every task of one run
#[derive(Clone)]
pub struct FetchContext {
    pub tenant: String,
    pub drive: Arc<dyn DriveClient>,
    pub content: Arc<ContentStore>,
    pub collector: NodeCollector,
}

pub struct FetchFolderTask {
    pub ctx: FetchContext,
    pub folder: DriveFile,
}

#[async_trait]
impl QueueTask for FetchFolderTask {
    fn describe(&self) -> String {
        format!("list folder {} ({})", self.folder.name, self.folder.id)
    }

    async fn run(&self) -> Result<Vec<Box<dyn QueueTask>>, AnyError> {
        let children = self.ctx.drive.list_folder(&self.folder.id).await?;
        debug!(folder = %self.folder.id, children = children.len(), "Listed folder");
        self.ctx.collector.push(self.folder.clone());

        let tasks = children
            .into_iter()
            .map(|child| {
                if child.is_folder() {
                    Box::new(FetchFolderTask {
                        ctx: self.ctx.clone(),
                        folder: child,
                    }) as Box<dyn QueueTask>
                } else {
                    Box::new(FetchFileTask {
                        ctx: self.ctx.clone(),
                        file: child,
                    }) as Box<dyn QueueTask>
                }
            })
            .collect();
        Ok(tasks)
    }
}

pub struct FetchFileTask {
    pub ctx: FetchContext,
    pub file: DriveFile,
}

#[async_trait]
impl QueueTask for FetchFileTask {
    fn describe(&self) -> String {
        format!("fetch file {} ({})", self.file.name, self.file.id)
    }

    async fn run(&self) -> Result<Vec<Box<dyn QueueTask>>, AnyError> {
        let body = self.ctx.drive.download(&self.file.id).await?;
        let key = storage::file_key(&self.ctx.tenant, &self.file.id);
        self.ctx.content.upload(&key, body).await?;
        // recorded only after the body landed, so a failed fetch leaves
        // the node missing and the retry scan can catch it
        self.ctx.collector.push(self.file.clone());
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::drive::{MemoryDrive, RateLimitedDrive};
    use crate::observability::Metrics;
    use crate::queue::QueueDownloader;
    use crate::quota::{QuotaLedger, QuotaLimit, QuotaLimiter};

    use super::*;

    fn sample_drive() -> Arc<MemoryDrive> {
        let drive = MemoryDrive::new();
        drive.add_folder("root", "Root", None);
        drive.add_folder("sub", "Archive", Some("root"));
        drive.add_file("f1", "notes", Some("root"), "hello");
        drive.add_file("f2", "report", Some("sub"), "quarterly");
        Arc::new(drive)
    }

    fn limited(drive: Arc<MemoryDrive>) -> Arc<dyn DriveClient> {
        let limiter = Arc::new(QuotaLimiter::new(
            QuotaLimit::new(100, Duration::from_secs(10)),
            QuotaLedger::default(),
            Arc::new(Metrics::new()),
        ));
        Arc::new(RateLimitedDrive::new(drive, limiter))
    }

    fn fetch_context(drive: Arc<dyn DriveClient>) -> FetchContext {
        FetchContext {
            tenant: "root".to_string(),
            drive,
            content: Arc::new(ContentStore::in_memory()),
            collector: NodeCollector::new(),
        }
    }

    async fn root_file(drive: &Arc<MemoryDrive>, id: &str) -> DriveFile {
        drive.get_file(id).await.unwrap()
    }

    #[tokio::test]
    async fn folder_fetch_walks_the_whole_tree() {
        let drive = sample_drive();
        let ctx = fetch_context(limited(Arc::clone(&drive)));
        let root = root_file(&drive, "root").await;

        let mut downloader = QueueDownloader::new(2, Arc::new(Metrics::new()));
        downloader.add_task(Box::new(FetchFolderTask {
            ctx: ctx.clone(),
            folder: root,
        }));
        let report = downloader.finished().await;

        assert!(report.failures.is_empty());
        let nodes = ctx.collector.into_nodes();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2", "root", "sub"]);
        assert!(ctx
            .content
            .exists(&storage::file_key("root", "f1"))
            .await
            .unwrap());
        assert!(ctx
            .content
            .exists(&storage::file_key("root", "f2"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unreachable_subfolder_does_not_block_the_rest() {
        let drive = sample_drive();
        drive.fail_on("sub");
        let ctx = fetch_context(limited(Arc::clone(&drive)));
        let root = root_file(&drive, "root").await;

        let mut downloader = QueueDownloader::new(2, Arc::new(Metrics::new()));
        downloader.add_task(Box::new(FetchFolderTask {
            ctx: ctx.clone(),
            folder: root,
        }));
        let report = downloader.finished().await;

        assert_eq!(report.failures.len(), 1);
        assert!(!report.root_failed());
        let nodes = ctx.collector.into_nodes();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        // f2 lives under the failed subfolder and was never discovered
        assert_eq!(ids, vec!["f1", "root"]);
    }

    #[tokio::test]
    async fn failed_download_leaves_the_node_unrecorded() {
        let drive = sample_drive();
        drive.fail_on("f1");
        let ctx = fetch_context(limited(Arc::clone(&drive)));
        let root = root_file(&drive, "root").await;

        let mut downloader = QueueDownloader::new(1, Arc::new(Metrics::new()));
        downloader.add_task(Box::new(FetchFolderTask {
            ctx: ctx.clone(),
            folder: root,
        }));
        let report = downloader.finished().await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].task.contains("notes"));
        let nodes = ctx.collector.into_nodes();
        assert!(!nodes.iter().any(|n| n.id == "f1"));
        assert!(!ctx
            .content
            .exists(&storage::file_key("root", "f1"))
            .await
            .unwrap());
    }
}
