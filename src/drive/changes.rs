//! Upstream change log
//!
//! Holds "changed upstream since the last successful ingestion" entries
//! per tenant. The post-transform retry scan reads this set and drops
//! entries once the local version has caught up. Watch/webhook intake is
//! out of scope; collaborators call [`ChangeLog::record`] directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{partitions, RecordStore, Result};

/// One upstream item known to have changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub file_id: String,
    pub title: String,
    pub version: i64,
    pub changed_at: DateTime<Utc>,
}

/// Persistent per-tenant change set, newest version per file wins
pub struct ChangeLog {
    store: Arc<RecordStore>,
}

impl ChangeLog {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Merges changes into the tenant's set; an entry replaces an
    /// existing one only when its version is at least as new
    pub fn record(&self, tenant: &str, changes: Vec<Change>) -> Result<()> {
        let mut merged = self.load(tenant)?;
        for change in changes {
            match merged.get(&change.file_id) {
                Some(existing) if existing.version > change.version => {}
                _ => {
                    merged.insert(change.file_id.clone(), change);
                }
            }
        }
        self.save(tenant, &merged)
    }

    /// Current change set, empty when nothing is recorded
    pub fn list(&self, tenant: &str) -> Result<Vec<Change>> {
        Ok(self.load(tenant)?.into_values().collect())
    }

    /// Drops the entry once ingestion has captured it; entries newer than
    /// `up_to_version` stay for the next scan
    pub fn forget(&self, tenant: &str, file_id: &str, up_to_version: i64) -> Result<()> {
        let mut merged = self.load(tenant)?;
        let caught_up = merged
            .get(file_id)
            .map(|change| change.version <= up_to_version)
            .unwrap_or(false);
        if !caught_up {
            return Ok(());
        }
        merged.remove(file_id);
        if merged.is_empty() {
            self.store.delete_record(&partitions::changes_key(tenant))
        } else {
            self.save(tenant, &merged)
        }
    }

    fn load(&self, tenant: &str) -> Result<BTreeMap<String, Change>> {
        let changes: Vec<Change> = self
            .store
            .read_record(&partitions::changes_key(tenant))?
            .unwrap_or_default();
        Ok(changes
            .into_iter()
            .map(|change| (change.file_id.clone(), change))
            .collect())
    }

    fn save(&self, tenant: &str, merged: &BTreeMap<String, Change>) -> Result<()> {
        let changes: Vec<&Change> = merged.values().collect();
        self.store
            .write_record(&partitions::changes_key(tenant), &changes)
    }
}
