//! Instrumented ledger and fixtures for consumer tests.
#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use stockledger_core::{
    CalcFlag, DerivedCost, ItemBalance, ItemKey, LedgerGateway, Movement, TransFlag,
};
use stockledger_inventory::{RecomputeSettings, Recomputer, TracingObserver};
use stockledger_memstore::{InMemoryLedger, LocalKeyLocks};
use stockledger_platform::RetryConfig;
use stockledger_worker::TriggerConsumer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch(ItemKey),
    FetchBalance(ItemKey),
    Commit(ItemKey),
    UpdateBalance(ItemKey),
}

/// Wraps [`InMemoryLedger`], recording calls and how many run at once.
#[derive(Default)]
pub struct InstrumentedLedger {
    pub inner: InMemoryLedger,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failing_fetches: AtomicUsize,
    fetch_delay: Mutex<Duration>,
    commit_delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl InstrumentedLedger {
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.fetch_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_commit_delay(self, delay: Duration) -> Self {
        *self.commit_delay.lock().unwrap() = delay;
        self
    }

    /// The next `count` fetches fail with a connection error.
    pub fn failing_fetches(self, count: usize) -> Self {
        self.failing_fetches.store(count, Ordering::SeqCst);
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn enter(&self, call: Call) -> InFlight<'_> {
        self.calls.lock().unwrap().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerGateway for InstrumentedLedger {
    async fn fetch_ordered_movements(&self, key: &ItemKey) -> anyhow::Result<Vec<Movement>> {
        let _guard = self.enter(Call::Fetch(key.clone()));
        let delay = *self.fetch_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        let remaining = self.failing_fetches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_fetches.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("connection reset by peer");
        }
        self.inner.fetch_ordered_movements(key).await
    }

    async fn commit_changes(&self, key: &ItemKey, changes: &[Movement]) -> anyhow::Result<()> {
        let _guard = self.enter(Call::Commit(key.clone()));
        let delay = *self.commit_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.inner.commit_changes(key, changes).await
    }

    async fn fetch_balance(&self, key: &ItemKey) -> anyhow::Result<Option<ItemBalance>> {
        let _guard = self.enter(Call::FetchBalance(key.clone()));
        self.inner.fetch_balance(key).await
    }

    async fn update_balance(&self, key: &ItemKey, balance: &ItemBalance) -> anyhow::Result<()> {
        let _guard = self.enter(Call::UpdateBalance(key.clone()));
        self.inner.update_balance(key, balance).await
    }
}

pub fn purchase(key: &ItemKey, row_id: i64, qty: i64, amount: i64) -> Movement {
    Movement {
        row_id,
        shop_id: key.shop_id.clone(),
        barcode: key.barcode.clone(),
        doc_no: format!("PO-{row_id:05}"),
        doc_date: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        trans_flag: TransFlag::PURCHASE,
        calc_flag: CalcFlag::Inbound,
        doc_ref: None,
        qty: Decimal::from(qty),
        amount: Decimal::from(amount),
        derived: DerivedCost::default(),
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

pub fn consumer(ledger: Arc<InstrumentedLedger>, workers: usize, retry: RetryConfig) -> TriggerConsumer {
    let settings = RecomputeSettings {
        dedup_gate: false,
        ..RecomputeSettings::default()
    };
    let recomputer = Recomputer::new(
        ledger,
        Arc::new(LocalKeyLocks::default()),
        Arc::new(TracingObserver),
        settings,
    );
    TriggerConsumer::new(Arc::new(recomputer), workers, retry)
}
