use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Scheduler interval must be positive: {field}")]
    ZeroInterval { field: String },

    #[error("Quota limit must be at least 1")]
    ZeroQuotaLimit,

    #[error("Quota window must be positive")]
    ZeroQuotaWindow,

    #[error("Downloader concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_scheduler(config)?;
    validate_quota(config)?;
    validate_downloader(config)?;
    Ok(())
}

/// A zero tick would spin the scheduler; a zero debounce is allowed
/// (it disables settling, which tests rely on)
fn validate_scheduler(config: &Config) -> Result<(), ValidationError> {
    if config.scheduler.tick.as_millis() == 0 {
        return Err(ValidationError::ZeroInterval {
            field: "scheduler.tick".to_string(),
        });
    }

    Ok(())
}

/// A zero limit or window would make acquire() block forever
fn validate_quota(config: &Config) -> Result<(), ValidationError> {
    if config.quota.limit == 0 {
        return Err(ValidationError::ZeroQuotaLimit);
    }

    if config.quota.window.as_millis() == 0 {
        return Err(ValidationError::ZeroQuotaWindow);
    }

    Ok(())
}

/// A zero-sized pool would never pick up a task
fn validate_downloader(config: &Config) -> Result<(), ValidationError> {
    if config.downloader.concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }

    Ok(())
}
