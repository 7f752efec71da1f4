//! Core of qpersist: persists a query cache to a key-value store and
//! restores it on startup.
//!
//! This crate provides:
//! - The persistence controller ([`attach`], [`QueryPersister`])
//! - The restore-or-discard policy
//! - A leading-edge throttle for change-driven saves
//! - Storage backends (memory, SQLite, files)
//! - Unified error types and layered configuration

pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod persister;
pub mod policy;
pub mod storage;
pub mod throttle;

pub use config::{AppConfig, PersistOptions};
pub use envelope::PersistedEnvelope;
pub use error::Error;
pub use persister::{Attachment, Listener, QueryCache, QueryPersister, RestoreOutcome, SaveSubscription, attach};
pub use policy::{Decision, DiscardReason, decide};
pub use storage::{FileStorage, MemoryStorage, SqliteStorage, Storage, SyncAdapter, SyncStorage};
pub use throttle::{Throttle, ThrottleState};
