//! Subcommand implementations.
//!
//! Each command works against a `Storage` handle so it can be exercised with
//! an in-memory backend.

pub mod clear;
pub mod inspect;

use std::sync::Arc;

use qpersist_core::config::BackendKind;
use qpersist_core::{AppConfig, Error, FileStorage, SqliteStorage, Storage};

pub use clear::clear_impl;
pub use inspect::{Inspection, inspect_impl};

/// Open the backend selected in `config`.
pub async fn open_storage(config: &AppConfig) -> Result<Arc<dyn Storage>, Error> {
    match config.backend {
        BackendKind::Sqlite => {
            tracing::debug!(path = %config.db_path.display(), "opening sqlite storage");
            Ok(Arc::new(SqliteStorage::open(&config.db_path).await?))
        }
        BackendKind::File => {
            tracing::debug!(dir = %config.data_dir.display(), "opening file storage");
            Ok(Arc::new(FileStorage::new(&config.data_dir)))
        }
    }
}
