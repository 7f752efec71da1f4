//! Unified error types for qpersist.
//!
//! Display strings carry a stable code prefix so operators can grep logs
//! for a failure class without parsing the message.

use tokio_rusqlite::rusqlite;

/// Unified error type for persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A storage backend rejected an operation.
    ///
    /// `FileStorage` raises it for keys it cannot map to a file; custom
    /// `Storage` implementations use it for their own refusals.
    #[error("STORAGE_ERROR: {0}")]
    Storage(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// The database was written by a newer storage layout.
    #[error("CACHE_ERROR: database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },

    /// Filesystem operation failed.
    #[error("IO_ERROR: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Envelope could not be encoded.
    #[error("SERIALIZE_ERROR: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A throttle was built outside a tokio runtime.
    #[error("NO_RUNTIME: throttled saves require a tokio runtime")]
    NoRuntime,
}

impl Error {
    /// Wrap an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io { context: context.into(), source }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
