use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::error::Result;

/// Fjall-backed persistent storage for orchestration records
///
/// One keyspace, one `records` partition. Every value is JSON; read of a
/// missing key returns `Ok(None)` so callers can treat absence as "first
/// run" rather than an error.
#[derive(Clone)]
pub struct RecordStore {
    keyspace: Keyspace,
    records: PartitionHandle,
}

impl RecordStore {
    /// Open or create a record store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening record store at: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let records = keyspace.open_partition("records", PartitionCreateOptions::default())?;

        info!("Record store opened successfully");
        Ok(Self { keyspace, records })
    }

    /// Write a record, replacing any previous value under the key
    pub fn write_record<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.records.insert(key, bytes)?;
        debug!("Wrote record: {}", key);
        Ok(())
    }

    /// Read a record, `Ok(None)` when the key is absent
    pub fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.records.get(key)? {
            Some(value) => {
                let decoded = serde_json::from_slice(&value)?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }

    /// Read every record whose key starts with the prefix, with the
    /// remainder of the key alongside each value
    pub fn read_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let mut out = Vec::new();

        for item in self.records.prefix(prefix) {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(&key);
            let rest = key[prefix.len()..].to_string();
            let decoded = serde_json::from_slice(&value)?;
            out.push((rest, decoded));
        }

        Ok(out)
    }

    /// Remove a record; removing an absent key is a no-op
    pub fn delete_record(&self, key: &str) -> Result<()> {
        self.records.remove(key)?;
        debug!("Deleted record: {}", key);
        Ok(())
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let mut record_count = 0;

        for item in self.records.iter() {
            item?;
            record_count += 1;
        }

        Ok(StoreStats { record_count })
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub record_count: usize,
}
