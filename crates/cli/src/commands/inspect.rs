//! `show` and `check`: evaluate the stored envelope without touching it.

use qpersist_core::{Decision, DiscardReason, Error, PersistOptions, PersistedEnvelope, Storage, decide};
use serde::Serialize;
use serde_json::Value;

/// What is stored under the key and what a restore would do with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    pub key: String,
    pub present: bool,
    pub bytes: usize,
    pub timestamp: Option<i64>,
    pub age_ms: Option<i64>,
    pub buster: Option<String>,
    pub expected_buster: String,
    pub max_age_ms: u64,
    pub decision: Decision,
}

impl Inspection {
    /// Human-readable multi-line summary.
    pub fn render(&self) -> String {
        if !self.present {
            return format!("key:      {}\nentry:    none\n", self.key);
        }

        let written = self
            .timestamp
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let age = self.age_ms.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".to_string());

        format!(
            "key:      {}\nbytes:    {}\nwritten:  {}\nage:      {} (max {}ms)\nbuster:   {:?} (expected {:?})\ndecision: {}\n",
            self.key,
            self.bytes,
            written,
            age,
            self.max_age_ms,
            self.buster.as_deref().unwrap_or("-"),
            self.expected_buster,
            self.decision,
        )
    }
}

/// Read the envelope under the configured key and evaluate it at `now_ms`.
pub async fn inspect_impl(storage: &dyn Storage, options: &PersistOptions, now_ms: i64) -> Result<Inspection, Error> {
    let mut inspection = Inspection {
        key: options.storage_key.clone(),
        present: false,
        bytes: 0,
        timestamp: None,
        age_ms: None,
        buster: None,
        expected_buster: options.buster.clone(),
        max_age_ms: options.max_age_ms,
        decision: Decision::Discard(DiscardReason::Absent),
    };

    let Some(raw) = storage.get_item(&options.storage_key).await?.filter(|raw| !raw.is_empty()) else {
        return Ok(inspection);
    };

    inspection.present = true;
    inspection.bytes = raw.len();

    match PersistedEnvelope::<Value>::from_json(&raw) {
        Ok(envelope) => {
            inspection.timestamp = envelope.timestamp;
            inspection.age_ms = envelope.written_at().map(|ts| now_ms - ts);
            inspection.buster = Some(envelope.buster.clone());
            inspection.decision = decide(Some(&envelope), now_ms, options.max_age_ms, &options.buster);
        }
        Err(e) => {
            tracing::info!(key = %options.storage_key, error = %e, "stored entry is not an envelope");
            inspection.decision = Decision::Discard(DiscardReason::Malformed);
        }
    }

    Ok(inspection)
}
