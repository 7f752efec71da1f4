//! Key-value storage backends for persisted envelopes.
//!
//! The persister talks to one async contract, [`Storage`]. Backends whose
//! operations never suspend implement [`SyncStorage`] instead and are lifted
//! with [`SyncAdapter`], so the controller logic exists once.
//!
//! - [`MemoryStorage`]: process-local map, synchronous
//! - [`SqliteStorage`]: SQLite via tokio-rusqlite, asynchronous
//! - [`FileStorage`]: one JSON file per key, asynchronous

pub mod file;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

pub use crate::Error;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Asynchronous key-value store holding string blobs.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the value under `key`.
    ///
    /// Returns `Ok(None)` if the key is absent.
    async fn get_item(&self, key: &str) -> Result<Option<String>, Error>;

    /// Store `value` under `key`, replacing any previous value atomically.
    async fn set_item(&self, key: &str, value: String) -> Result<(), Error>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), Error>;
}

/// Always-available key-value store whose operations complete immediately.
pub trait SyncStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, Error>;

    fn set_item(&self, key: &str, value: String) -> Result<(), Error>;

    fn remove_item(&self, key: &str) -> Result<(), Error>;
}

/// Lifts a [`SyncStorage`] into the async [`Storage`] contract.
#[derive(Debug, Default, Clone)]
pub struct SyncAdapter<S>(pub S);

impl<S> SyncAdapter<S> {
    pub fn new(inner: S) -> Self {
        Self(inner)
    }

    pub fn inner(&self) -> &S {
        &self.0
    }
}

#[async_trait]
impl<S: SyncStorage> Storage for SyncAdapter<S> {
    async fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        self.0.get_item(key)
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), Error> {
        self.0.set_item(key, value)
    }

    async fn remove_item(&self, key: &str) -> Result<(), Error> {
        self.0.remove_item(key)
    }
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for Arc<T> {
    async fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        (**self).get_item(key).await
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), Error> {
        (**self).set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), Error> {
        (**self).remove_item(key).await
    }
}
