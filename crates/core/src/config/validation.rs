//! Configuration validation rules.
//!
//! Applied to `AppConfig` after it has been loaded from environment, files,
//! or defaults, and usable on bare `PersistOptions` built in code.

use crate::config::{AppConfig, PersistOptions};
use thiserror::Error;

/// Longest throttle window accepted, one minute.
const MAX_THROTTLE_TIME_MS: u64 = 60_000;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl PersistOptions {
    /// Validate persistence options.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `storage_key` is empty
    /// - `max_age_ms` is 0
    /// - `throttle_time_ms` exceeds one minute
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_key.is_empty() {
            return Err(ConfigError::Invalid { field: "storage_key".into(), reason: "must not be empty".into() });
        }

        if self.max_age_ms == 0 {
            return Err(ConfigError::Invalid { field: "max_age_ms".into(), reason: "must be greater than 0".into() });
        }

        if self.throttle_time_ms > MAX_THROTTLE_TIME_MS {
            return Err(ConfigError::Invalid {
                field: "throttle_time_ms".into(),
                reason: "must not exceed 1 minute (60000ms)".into(),
            });
        }

        if self.throttle_time_ms == 0 {
            tracing::warn!(
                storage_key = %self.storage_key,
                "throttle_time_ms is 0; every cache change schedules its own write"
            );
        }

        Ok(())
    }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the persistence options are invalid
    /// or the selected backend has an empty path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.persist.validate()?;

        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "db_path".into(), reason: "must not be empty".into() });
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "data_dir".into(), reason: "must not be empty".into() });
        }

        Ok(())
    }
}
