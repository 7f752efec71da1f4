//! Restore-or-discard decision for a persisted envelope.
//!
//! Pure function of its inputs: the same envelope, time, age limit and
//! buster always produce the same decision, whatever backend the envelope
//! was read from.

use std::fmt;

use serde::Serialize;

use crate::envelope::PersistedEnvelope;

/// Outcome of evaluating a stored envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Restore,
    Discard(DiscardReason),
}

/// Why an envelope was not restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Nothing stored under the key.
    Absent,
    /// Timestamp missing or zero.
    MissingTimestamp,
    /// Older than the configured max age.
    Expired,
    /// Stored buster differs from the expected one.
    Busted,
    /// Stored blob did not decode as an envelope.
    Malformed,
}

impl Decision {
    pub fn is_restore(&self) -> bool {
        matches!(self, Decision::Restore)
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscardReason::Absent => "absent",
            DiscardReason::MissingTimestamp => "missing timestamp",
            DiscardReason::Expired => "expired",
            DiscardReason::Busted => "buster mismatch",
            DiscardReason::Malformed => "malformed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Restore => f.write_str("restore"),
            Decision::Discard(reason) => write!(f, "discard ({reason})"),
        }
    }
}

/// Decide whether `envelope` may be restored at `now_ms`.
///
/// Expiry and buster mismatch are OR'd; either alone discards. When both
/// hold the reported reason is `Expired`.
pub fn decide<S>(envelope: Option<&PersistedEnvelope<S>>, now_ms: i64, max_age_ms: u64, buster: &str) -> Decision {
    let Some(envelope) = envelope else {
        return Decision::Discard(DiscardReason::Absent);
    };

    let Some(timestamp) = envelope.written_at() else {
        return Decision::Discard(DiscardReason::MissingTimestamp);
    };

    let age_ms = i128::from(now_ms) - i128::from(timestamp);
    let expired = age_ms > i128::from(max_age_ms);
    let busted = envelope.buster != buster;

    if expired {
        Decision::Discard(DiscardReason::Expired)
    } else if busted {
        Decision::Discard(DiscardReason::Busted)
    } else {
        Decision::Restore
    }
}
