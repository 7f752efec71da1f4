//! The persisted envelope and its JSON wire format.
//!
//! An envelope is one JSON object with exactly three fields:
//!
//! ```json
//! { "timestamp": 1700000000000, "buster": "v1", "cacheState": { ... } }
//! ```
//!
//! `cacheState` is whatever the cache's dehydrate step produced; this crate
//! only moves it around.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Error;

/// The unit written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEnvelope<S> {
    /// Milliseconds since epoch at write time. `None` or `0` marks a
    /// malformed or legacy entry.
    #[serde(default)]
    pub timestamp: Option<i64>,

    /// Caller-supplied version tag.
    #[serde(default)]
    pub buster: String,

    /// Opaque cache snapshot.
    pub cache_state: S,
}

impl<S> PersistedEnvelope<S> {
    pub fn new(timestamp: i64, buster: impl Into<String>, cache_state: S) -> Self {
        Self { timestamp: Some(timestamp), buster: buster.into(), cache_state }
    }

    /// Timestamp if present and non-zero.
    pub fn written_at(&self) -> Option<i64> {
        self.timestamp.filter(|ts| *ts != 0)
    }
}

impl<S: Serialize> PersistedEnvelope<S> {
    /// Encode as the single blob stored under the storage key.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<S: DeserializeOwned> PersistedEnvelope<S> {
    /// Decode a stored blob.
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw)?)
    }
}
