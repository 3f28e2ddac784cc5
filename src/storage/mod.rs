//! Object storage abstraction for fetched bodies and converted content
//! Uses Apache Arrow object_store crate

use bytes::Bytes;
use object_store::{ObjectStore, path::Path as StoragePath};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Key for a raw fetched body: {tenant}/files/{file_id}
pub fn file_key(tenant: &str, file_id: &str) -> String {
    format!("{}/files/{}", tenant, file_id)
}

/// Key for converted output: {tenant}/content/{file_id}.md
pub fn content_key(tenant: &str, file_id: &str) -> String {
    format!("{}/content/{}.md", tenant, file_id)
}

/// Key for a rendered preview: {tenant}/previews/{file_id}.html
pub fn preview_key(tenant: &str, file_id: &str) -> String {
    format!("{}/previews/{}.html", tenant, file_id)
}

/// Content store wrapping object_store
#[derive(Clone)]
pub struct ContentStore {
    store: Arc<dyn ObjectStore>,
}

impl ContentStore {
    /// Create a content store with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
        }
    }

    /// Create filesystem-backed storage rooted at the given directory
    pub fn local<P: AsRef<Path>>(root: P) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Upload bytes to storage
    pub async fn upload(&self, key: &str, data: Bytes) -> Result<UploadMetadata> {
        let path = StoragePath::from(key);
        let size = data.len();

        let put_result = self.store.put(&path, data.into()).await?;

        tracing::debug!(key, size, "Uploaded to storage");

        Ok(UploadMetadata {
            key: key.to_string(),
            etag: put_result.e_tag.clone(),
            size,
        })
    }

    /// Download from storage; a missing key surfaces as
    /// [`StorageError::NotFound`] so callers can treat absence as a skip
    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = StoragePath::from(key);

        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = result.bytes().await?;

        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");

        Ok(bytes)
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
