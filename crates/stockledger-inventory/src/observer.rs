use stockledger_core::{DerivedCost, ItemKey};
use tracing::{debug, info, warn};

use crate::recompute::{MissingReferencePolicy, RecomputeOutcome};

/// Diagnostics emitted while recomputing a single item.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    LineChanged {
        key: ItemKey,
        row_id: i64,
        doc_no: String,
        before: DerivedCost,
        after: DerivedCost,
    },
    ReferenceMissing {
        key: ItemKey,
        row_id: i64,
        doc_no: String,
        doc_ref: Option<String>,
        policy: MissingReferencePolicy,
    },
    TrackerUnavailable {
        key: ItemKey,
        error: String,
    },
    AlreadyApplied {
        key: ItemKey,
    },
    LockReleaseFailed {
        key: ItemKey,
        error: String,
    },
    Completed(RecomputeOutcome),
}

pub trait RecomputeObserver: Send + Sync {
    fn observe(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RecomputeObserver for TracingObserver {
    fn observe(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::LineChanged {
                key,
                row_id,
                doc_no,
                before,
                after,
            } => debug!(
                shop_id = %key.shop_id,
                barcode = %key.barcode,
                row_id,
                doc_no = %doc_no,
                ?before,
                ?after,
                "ledger line cost changed"
            ),
            Diagnostic::ReferenceMissing {
                key,
                row_id,
                doc_no,
                doc_ref,
                policy,
            } => warn!(
                shop_id = %key.shop_id,
                barcode = %key.barcode,
                row_id,
                doc_no = %doc_no,
                ?doc_ref,
                ?policy,
                "referenced document not found earlier in ledger"
            ),
            Diagnostic::TrackerUnavailable { key, error } => warn!(
                shop_id = %key.shop_id,
                barcode = %key.barcode,
                "position tracker unavailable, replaying without gate: {error}"
            ),
            Diagnostic::AlreadyApplied { key } => debug!(
                shop_id = %key.shop_id,
                barcode = %key.barcode,
                "ledger already applied, skipping recompute"
            ),
            Diagnostic::LockReleaseFailed { key, error } => warn!(
                shop_id = %key.shop_id,
                barcode = %key.barcode,
                "failed to release recompute lock: {error}"
            ),
            Diagnostic::Completed(outcome) => info!(
                shop_id = %outcome.key.shop_id,
                barcode = %outcome.key.barcode,
                status = ?outcome.status,
                rows_changed = outcome.rows_changed,
                balance_written = outcome.balance_written,
                "recompute finished"
            ),
        }
    }
}
