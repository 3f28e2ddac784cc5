//! Upstream drive client
//!
//! Everything the sync engine knows about the remote side lives behind
//! the [`DriveClient`] trait. Production wiring wraps a real client in
//! [`RateLimitedDrive`] so every upstream call consumes a quota permit;
//! tests and the demo wiring use the deterministic [`MemoryDrive`].

pub mod changes;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Container, EngineHandle};
use crate::ledger::{partitions, RecordError, RecordStore};
use crate::observability::Metrics;
use crate::quota::{QuotaLedger, QuotaLimit, QuotaLimiter};
use crate::AnyError;

/// MIME type marking folder entries
pub const FOLDER_MIME: &str = "application/x-folder";

/// Metadata for one upstream file or folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub version: i64,
    pub parent: Option<String>,
    pub modified_at: DateTime<Utc>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }
}

/// Read access to the upstream drive
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Direct children of a folder
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>, AnyError>;

    async fn get_file(&self, file_id: &str) -> Result<DriveFile, AnyError>;

    async fn download(&self, file_id: &str) -> Result<Bytes, AnyError>;
}

/// Client wrapper that takes a quota permit before every upstream call
pub struct RateLimitedDrive {
    inner: Arc<dyn DriveClient>,
    limiter: Arc<QuotaLimiter>,
}

impl RateLimitedDrive {
    pub fn new(inner: Arc<dyn DriveClient>, limiter: Arc<QuotaLimiter>) -> Self {
        Self { inner, limiter }
    }

    /// Loads the persisted permit ledger, wires ledger saves back into
    /// the record store and wraps the client. Restart therefore keeps
    /// counting against the same window instead of starting fresh.
    pub async fn with_persisted_ledger(
        inner: Arc<dyn DriveClient>,
        store: Arc<RecordStore>,
        limit: QuotaLimit,
        metrics: Arc<Metrics>,
    ) -> Result<Arc<Self>, RecordError> {
        let ledger = store
            .read_record::<QuotaLedger>(&partitions::quota_key())?
            .unwrap_or_default();
        let limiter = Arc::new(QuotaLimiter::new(limit, ledger, metrics));
        let save_store = Arc::clone(&store);
        limiter
            .on_save(move |ledger| {
                save_store.write_record(&partitions::quota_key(), ledger)?;
                Ok(())
            })
            .await;
        Ok(Arc::new(Self::new(inner, limiter)))
    }

    pub fn limiter(&self) -> Arc<QuotaLimiter> {
        Arc::clone(&self.limiter)
    }
}

#[async_trait]
impl DriveClient for RateLimitedDrive {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>, AnyError> {
        self.limiter.acquire().await;
        self.inner.list_folder(folder_id).await
    }

    async fn get_file(&self, file_id: &str) -> Result<DriveFile, AnyError> {
        self.limiter.acquire().await;
        self.inner.get_file(file_id).await
    }

    async fn download(&self, file_id: &str) -> Result<Bytes, AnyError> {
        self.limiter.acquire().await;
        self.inner.download(file_id).await
    }
}

/// Container owning the upstream client and its quota limiter
///
/// Registered under [`DriveApiContainer::NAME`]; other containers look
/// the shared client up through the engine. `flush_data` forces a final
/// ledger save so the permit history survives shutdown.
pub struct DriveApiContainer {
    drive: Arc<RateLimitedDrive>,
}

impl DriveApiContainer {
    pub const NAME: &'static str = "drive";

    pub fn new(drive: Arc<RateLimitedDrive>) -> Arc<Self> {
        Arc::new(Self { drive })
    }

    pub fn drive(&self) -> Arc<RateLimitedDrive> {
        Arc::clone(&self.drive)
    }
}

#[async_trait]
impl Container for DriveApiContainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn init(&self, _engine: EngineHandle) -> Result<(), AnyError> {
        Ok(())
    }

    async fn flush_data(&self) -> Result<(), AnyError> {
        self.drive.limiter().save_now().await;
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[derive(Default)]
struct MemoryDriveState {
    files: HashMap<String, DriveFile>,
    bodies: HashMap<String, Bytes>,
    failing: std::collections::HashSet<String>,
}

/// Deterministic in-process drive for tests and demo wiring
///
/// Folders and files are registered up front; `fail_on` makes every call
/// touching the given id fail, which is how partial-tree tolerance gets
/// exercised.
#[derive(Default)]
pub struct MemoryDrive {
    state: std::sync::Mutex<MemoryDriveState>,
    calls: AtomicUsize,
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, id: &str, name: &str, parent: Option<&str>) {
        self.insert(DriveFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: FOLDER_MIME.to_string(),
            version: 1,
            parent: parent.map(str::to_string),
            modified_at: Utc::now(),
        });
    }

    pub fn add_file(&self, id: &str, name: &str, parent: Option<&str>, body: &str) {
        self.insert(DriveFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: "text/plain".to_string(),
            version: 1,
            parent: parent.map(str::to_string),
            modified_at: Utc::now(),
        });
        let mut state = self.lock();
        state
            .bodies
            .insert(id.to_string(), Bytes::from(body.to_string()));
    }

    fn insert(&self, file: DriveFile) {
        let mut state = self.lock();
        state.files.insert(file.id.clone(), file);
    }

    /// Replaces a file body and bumps its version, like an upstream edit
    pub fn update_body(&self, id: &str, body: &str) -> Option<i64> {
        let mut state = self.lock();
        let file = state.files.get_mut(id)?;
        file.version += 1;
        file.modified_at = Utc::now();
        let version = file.version;
        state
            .bodies
            .insert(id.to_string(), Bytes::from(body.to_string()));
        Some(version)
    }

    /// Makes every call touching this id fail
    pub fn fail_on(&self, id: &str) {
        self.lock().failing.insert(id.to_string());
    }

    /// Number of client calls served so far, failures included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryDriveState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check(&self, state: &MemoryDriveState, id: &str) -> Result<(), AnyError> {
        if state.failing.contains(id) {
            return Err(format!("upstream error for {id}").into());
        }
        Ok(())
    }
}

#[async_trait]
impl DriveClient for MemoryDrive {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>, AnyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        self.check(&state, folder_id)?;
        let folder = state
            .files
            .get(folder_id)
            .ok_or_else(|| format!("no such folder: {folder_id}"))?;
        if !folder.is_folder() {
            return Err(format!("not a folder: {folder_id}").into());
        }
        let mut children: Vec<DriveFile> = state
            .files
            .values()
            .filter(|file| file.parent.as_deref() == Some(folder_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn get_file(&self, file_id: &str) -> Result<DriveFile, AnyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        self.check(&state, file_id)?;
        state
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| format!("no such file: {file_id}").into())
    }

    async fn download(&self, file_id: &str) -> Result<Bytes, AnyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        self.check(&state, file_id)?;
        state
            .bodies
            .get(file_id)
            .cloned()
            .ok_or_else(|| format!("no body for: {file_id}").into())
    }
}
