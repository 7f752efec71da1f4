//! CLI argument definitions using clap derive.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use qpersist_core::AppConfig;
use qpersist_core::config::BackendKind;

/// Inspect and manage a persisted query cache.
///
/// Settings come from QPERSIST_* environment variables and the TOML file in
/// QPERSIST_CONFIG_FILE; flags given here override both.
#[derive(Parser, Debug)]
#[command(name = "qpersist")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Storage backend
    #[arg(long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// SQLite database path (sqlite backend)
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Entry directory (file backend)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Storage key holding the envelope
    #[arg(long, global = true)]
    pub key: Option<String>,

    /// Expected buster
    #[arg(long, global = true)]
    pub buster: Option<String>,

    /// Maximum envelope age in milliseconds
    #[arg(long, global = true)]
    pub max_age_ms: Option<u64>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Show the stored envelope and whether it would be restored
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Exit 0 if the stored envelope would be restored, 1 otherwise
    Check,

    /// Remove the stored envelope
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Sqlite,
    File,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Sqlite => BackendKind::Sqlite,
            Backend::File => BackendKind::File,
        }
    }
}

impl Cli {
    /// Overlay flags onto loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }
        if let Some(path) = &self.db_path {
            config.db_path = path.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(key) = &self.key {
            config.persist.storage_key = key.clone();
        }
        if let Some(buster) = &self.buster {
            config.persist.buster = buster.clone();
        }
        if let Some(max_age_ms) = self.max_age_ms {
            config.persist.max_age_ms = max_age_ms;
        }
    }

    /// Default log filter for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}
