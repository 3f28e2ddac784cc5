/// Fjall-based persistence layer for orchestration records
///
/// This module provides the durable key-value surface the rest of the
/// engine persists through. It uses Fjall (an embedded LSM key-value
/// store) to hold:
///
/// - Tenant job queues (`jobs:{tenant}`)
/// - The quota ledger (`quota:ledger`)
/// - Drive and content trees (`drive-tree:{tenant}`, `content-tree:{tenant}`)
/// - Upstream change logs (`changes:{tenant}`)
///
/// All values are JSON. Reads of absent keys return `None` so components
/// can bootstrap from an empty store without special-casing first runs.
///
/// ## Usage
///
/// ```rust,ignore
/// use syncbox::ledger::RecordStore;
///
/// let store = RecordStore::open("data/records")?;
/// store.write_record(&jobs_key("drive-a"), &queue)?;
/// let queue: Option<Vec<Job>> = store.read_record(&jobs_key("drive-a"))?;
/// ```

pub mod error;
pub mod partitions;
pub mod store;

pub use error::{RecordError, Result};
pub use store::{RecordStore, StoreStats};
