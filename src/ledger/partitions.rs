/// Key layout and encoding utilities for the records partition
///
/// Record families, one JSON value each:
/// - `jobs:{tenant}` -> Vec<Job>
/// - `quota:ledger` -> QuotaLedger
/// - `drive-tree:{tenant}` -> Vec<DriveFile>
/// - `content-tree:{tenant}` -> Vec<ContentNode>
/// - `changes:{tenant}` -> Vec<Change>
///
/// Tenant ids must not contain `:`.

pub const JOBS_PREFIX: &str = "jobs:";

/// Encode a tenant job queue key: jobs:{tenant}
pub fn jobs_key(tenant: &str) -> String {
    format!("jobs:{}", tenant)
}

/// Decode a tenant job queue key: jobs:{tenant} -> tenant
pub fn decode_jobs_key(key: &str) -> Option<String> {
    key.strip_prefix(JOBS_PREFIX).map(String::from)
}

/// The quota ledger key (one per deployment)
pub fn quota_key() -> String {
    "quota:ledger".to_string()
}

/// Encode a drive tree key: drive-tree:{tenant}
pub fn drive_tree_key(tenant: &str) -> String {
    format!("drive-tree:{}", tenant)
}

/// Encode a content tree key: content-tree:{tenant}
pub fn content_tree_key(tenant: &str) -> String {
    format!("content-tree:{}", tenant)
}

/// Encode an upstream change log key: changes:{tenant}
pub fn changes_key(tenant: &str) -> String {
    format!("changes:{}", tenant)
}
