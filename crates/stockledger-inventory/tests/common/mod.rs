//! Shared fixtures for recompute integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use stockledger_core::{CalcFlag, DerivedCost, ItemKey, LedgerGateway, Movement, TransFlag};
use stockledger_inventory::{Diagnostic, RecomputeObserver, RecomputeSettings, Recomputer};
use stockledger_memstore::LocalKeyLocks;

pub const SHOP_ID: &str = "2PrIIqTWxoBXv16K310sNwfHmfY";
pub const BARCODE: &str = "BARCODE015";

pub fn key() -> ItemKey {
    ItemKey::new(SHOP_ID, BARCODE)
}

pub fn inbound(row_id: i64, doc_no: &str, day: u32, flag: TransFlag, qty: Decimal, amount: Decimal) -> Movement {
    movement(row_id, doc_no, day, flag, CalcFlag::Inbound, qty, amount)
}

pub fn outbound(row_id: i64, doc_no: &str, day: u32, flag: TransFlag, qty: Decimal) -> Movement {
    movement(row_id, doc_no, day, flag, CalcFlag::Outbound, qty, Decimal::ZERO)
}

pub fn referencing(mut movement: Movement, doc_ref: &str) -> Movement {
    movement.doc_ref = Some(doc_ref.to_string());
    movement
}

fn movement(
    row_id: i64,
    doc_no: &str,
    day: u32,
    flag: TransFlag,
    calc_flag: CalcFlag,
    qty: Decimal,
    amount: Decimal,
) -> Movement {
    Movement {
        row_id,
        shop_id: SHOP_ID.to_string(),
        barcode: BARCODE.to_string(),
        doc_no: doc_no.to_string(),
        doc_date: Utc.with_ymd_and_hms(2024, 5, day, 10, 0, 0).unwrap(),
        trans_flag: flag,
        calc_flag,
        doc_ref: None,
        qty,
        amount,
        derived: DerivedCost::default(),
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RecordingObserver {
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Diagnostic) -> bool) -> usize {
        self.diagnostics.lock().unwrap().iter().filter(|d| matches(d)).count()
    }
}

impl RecomputeObserver for RecordingObserver {
    fn observe(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic);
    }
}

pub fn recomputer(
    gateway: Arc<dyn LedgerGateway>,
    observer: Arc<RecordingObserver>,
    settings: RecomputeSettings,
) -> Recomputer {
    Recomputer::new(gateway, Arc::new(LocalKeyLocks::default()), observer, settings)
}
