//! Persistence options and application configuration with layered loading.
//!
//! `PersistOptions` is what the persister consumes. `AppConfig` wraps it with
//! the backend selection used by the CLI and is loaded with figment from:
//!
//! 1. Environment variables (QPERSIST_*)
//! 2. TOML config file (if QPERSIST_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "REACT_QUERY_OFFLINE_CACHE";

/// Options controlling when and how the cache is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOptions {
    /// The single key under which the envelope is stored.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Minimum spacing between writes triggered by cache changes.
    #[serde(default = "default_throttle_time_ms")]
    pub throttle_time_ms: u64,

    /// Upper bound on envelope age for a restore.
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,

    /// Version tag compared for exact equality against the stored one.
    #[serde(default)]
    pub buster: String,
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.into()
}

fn default_throttle_time_ms() -> u64 {
    1_000
}

fn default_max_age_ms() -> u64 {
    86_400_000 // 24h
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            throttle_time_ms: default_throttle_time_ms(),
            max_age_ms: default_max_age_ms(),
            buster: String::new(),
        }
    }
}

impl PersistOptions {
    /// Throttle window as a Duration for tokio timers.
    pub fn throttle_time(&self) -> Duration {
        Duration::from_millis(self.throttle_time_ms)
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_throttle_time_ms(mut self, ms: u64) -> Self {
        self.throttle_time_ms = ms;
        self
    }

    pub fn with_max_age_ms(mut self, ms: u64) -> Self {
        self.max_age_ms = ms;
        self
    }

    pub fn with_buster(mut self, buster: impl Into<String>) -> Self {
        self.buster = buster.into();
        self
    }
}

/// Which storage backend the CLI opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    File,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (QPERSIST_*)
/// 2. TOML config file (if QPERSIST_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage backend.
    ///
    /// Set via QPERSIST_BACKEND environment variable.
    #[serde(default)]
    pub backend: BackendKind,

    /// Path to the SQLite database used by the `sqlite` backend.
    ///
    /// Set via QPERSIST_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory holding entries for the `file` backend.
    ///
    /// Set via QPERSIST_DATA_DIR environment variable.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Persistence options.
    ///
    /// Nested keys use a double underscore, e.g. QPERSIST_PERSIST__BUSTER.
    #[serde(default)]
    pub persist: PersistOptions,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./qpersist.sqlite")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./qpersist-data")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            db_path: default_db_path(),
            data_dir: default_data_dir(),
            persist: PersistOptions::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("QPERSIST_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("QPERSIST_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::from_figment(figment)
    }

    /// Extract and validate from an already-assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
