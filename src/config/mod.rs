//! Configuration management for syncbox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use syncbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Scheduler tick: {}", config.scheduler.tick);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `SYNCBOX__<section>__<key>`
//!
//! Examples:
//! - `SYNCBOX__SCHEDULER__TICK=50ms`
//! - `SYNCBOX__QUOTA__LIMIT=50`
//! - `SYNCBOX__STORAGE__PROVIDER=memory`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/syncbox.toml`.
//! This can be overridden using the `SYNCBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::HumanDuration;
pub use models::{
    Config, DownloaderConfig, QuotaConfig, SchedulerConfig, ServerConfig, StorageConfig,
    StorageProvider,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`SYNCBOX__*`)
    /// 2. TOML file (default: `config/syncbox.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or
    /// validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
