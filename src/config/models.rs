use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            quota: QuotaConfig::default(),
            downloader: DownloaderConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_fjall_path")]
    pub fjall_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            fjall_path: default_fjall_path(),
        }
    }
}

fn default_fjall_path() -> PathBuf {
    PathBuf::from("data/records")
}

/// Scheduler cadence and retry timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Polling interval of the job scheduler loop
    #[serde(default = "default_tick")]
    pub tick: HumanDuration,
    /// Quiet period after the most recent enqueue before a tenant's
    /// queue is considered for dispatch
    #[serde(default = "default_debounce")]
    pub debounce: HumanDuration,
    /// Forward delay applied to retry jobs scheduled by the
    /// post-conversion version scan
    #[serde(default = "default_retry_delay")]
    pub retry_delay: HumanDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            debounce: default_debounce(),
            retry_delay: default_retry_delay(),
        }
    }
}

fn default_tick() -> HumanDuration {
    HumanDuration(100)
}

fn default_debounce() -> HumanDuration {
    HumanDuration(1000)
}

fn default_retry_delay() -> HumanDuration {
    HumanDuration(10_000)
}

/// Upstream quota limit
///
/// The defaults sit slightly under the provider cap of 100 calls per
/// 10 seconds to absorb clock skew between us and the provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_limit")]
    pub limit: usize,
    #[serde(default = "default_quota_window")]
    pub window: HumanDuration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: default_quota_limit(),
            window: default_quota_window(),
        }
    }
}

fn default_quota_limit() -> usize {
    95
}

fn default_quota_window() -> HumanDuration {
    HumanDuration(10_000)
}

/// Recursive downloader pool size
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloaderConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// Content storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Memory,
    Local,
}

impl Default for StorageProvider {
    fn default() -> Self {
        StorageProvider::Local
    }
}

/// Content storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/content")
}
