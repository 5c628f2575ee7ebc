use std::time::Duration;

use stockledger_core::ItemKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecomputeError {
    #[error("stock ledger access failed for {key}: {source:#}")]
    Ledger {
        key: ItemKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("item balance write failed for {key}: {source:#}")]
    Balance {
        key: ItemKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("position tracker failed for {key}: {source:#}")]
    Tracker {
        key: ItemKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to acquire recompute lock for {key}: {source:#}")]
    Lock {
        key: ItemKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("gave up waiting {waited:?} for recompute lock on {key}")]
    LockTimeout { key: ItemKey, waited: Duration },

    #[error("recompute of {key} exceeded its {deadline:?} deadline")]
    Timeout { key: ItemKey, deadline: Duration },

    #[error("row {row_id} ({doc_no}) of {key} references unknown document {doc_ref:?}")]
    MissingReference {
        key: ItemKey,
        row_id: i64,
        doc_no: String,
        doc_ref: Option<String>,
    },
}

impl RecomputeError {
    /// Whether running the same recompute again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingReference { .. })
    }

    pub fn key(&self) -> &ItemKey {
        match self {
            Self::Ledger { key, .. }
            | Self::Balance { key, .. }
            | Self::Tracker { key, .. }
            | Self::Lock { key, .. }
            | Self::LockTimeout { key, .. }
            | Self::Timeout { key, .. }
            | Self::MissingReference { key, .. } => key,
        }
    }
}
