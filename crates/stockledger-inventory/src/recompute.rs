use std::{collections::HashMap, str::FromStr, sync::Arc, time::Duration};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stockledger_core::{
    CalcFlag, CostSourcing, DerivedCost, ItemBalance, ItemKey, KeyLock, LedgerGateway, Movement,
    MovementSnapshot, PositionTracker,
};
use tokio::time::timeout;

use crate::{
    accumulator::{CostAccumulator, DEFAULT_PRECISION},
    error::RecomputeError,
    observer::{Diagnostic, RecomputeObserver},
};

/// What to do when a movement's referenced document is not found earlier in
/// the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReferencePolicy {
    /// Borrow a cost of zero.
    #[default]
    ZeroCost,
    /// Cost the line as if it had no reference.
    RunningAverage,
    /// Abort the recompute before anything is written.
    Fail,
}

impl FromStr for MissingReferencePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "zero" | "zero_cost" => Ok(Self::ZeroCost),
            "average" | "running_average" => Ok(Self::RunningAverage),
            "fail" => Ok(Self::Fail),
            other => anyhow::bail!("unsupported missing reference policy: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecomputeSettings {
    pub precision: u32,
    pub deadline: Duration,
    pub lock_wait: Duration,
    pub missing_reference: MissingReferencePolicy,
    pub dedup_gate: bool,
}

impl Default for RecomputeSettings {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            deadline: Duration::from_secs(30),
            lock_wait: Duration::from_secs(30),
            missing_reference: MissingReferencePolicy::default(),
            dedup_gate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeStatus {
    /// Ledger rows or the cached balance were rewritten.
    Applied,
    /// Replay matched what was stored.
    Unchanged,
    /// The position tracker showed the ledger was already applied.
    Skipped,
    /// The item has no movements.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecomputeOutcome {
    pub key: ItemKey,
    pub status: RecomputeStatus,
    pub rows_changed: usize,
    pub balance_written: bool,
    pub final_balance: Option<ItemBalance>,
}

/// Result of replaying one item's ledger in memory.
#[derive(Debug, Clone)]
pub struct Replay {
    /// Every movement in replay order, carrying freshly derived costs.
    pub ledger: Vec<Movement>,
    /// Movements whose derived costs differ from what was stored.
    pub changes: Vec<Movement>,
    pub first_changed: Option<usize>,
    pub final_balance: ItemBalance,
}

/// Replays `movements` from a zero opening balance.
pub fn replay(
    key: &ItemKey,
    mut movements: Vec<Movement>,
    settings: &RecomputeSettings,
    observer: &dyn RecomputeObserver,
) -> Result<Replay, RecomputeError> {
    movements.sort_by(Movement::replay_order);

    let mut accumulator = CostAccumulator::new(key.clone(), settings.precision);
    let mut document_rates: HashMap<String, Decimal> = HashMap::new();
    let mut changes = Vec::new();
    let mut first_changed = None;

    for (position, movement) in movements.iter_mut().enumerate() {
        let derived = apply_line(
            &mut accumulator,
            movement,
            &document_rates,
            settings.missing_reference,
            observer,
        )?;

        document_rates
            .entry(movement.doc_no.clone())
            .or_insert(derived.balance_average);

        if derived != movement.derived {
            observer.observe(Diagnostic::LineChanged {
                key: key.clone(),
                row_id: movement.row_id,
                doc_no: movement.doc_no.clone(),
                before: movement.derived,
                after: derived,
            });
            movement.derived = derived;
            changes.push(movement.clone());
            first_changed.get_or_insert(position);
        }
    }

    Ok(Replay {
        final_balance: accumulator.balance(),
        ledger: movements,
        changes,
        first_changed,
    })
}

fn apply_line(
    accumulator: &mut CostAccumulator,
    movement: &Movement,
    document_rates: &HashMap<String, Decimal>,
    policy: MissingReferencePolicy,
    observer: &dyn RecomputeObserver,
) -> Result<DerivedCost, RecomputeError> {
    let qty = movement.qty;
    if qty <= Decimal::ZERO {
        return Ok(derive(accumulator, Decimal::ZERO, Decimal::ZERO));
    }

    let (cost_per_unit, total_cost) = match movement.trans_flag.cost_sourcing() {
        CostSourcing::ReferencedDocument if movement.reference().is_some() => {
            match resolve_reference(accumulator.key(), movement, document_rates, policy, observer)? {
                Some(rate) => match movement.calc_flag {
                    CalcFlag::Inbound => {
                        let applied = accumulator.apply_inbound(qty, rate * qty);
                        (applied.line_average, applied.amount)
                    }
                    CalcFlag::Outbound => {
                        let applied = accumulator.apply_outbound_with_external_cost(qty, rate);
                        (applied.average_cost_used, applied.cost_removed)
                    }
                },
                None => apply_own_cost(accumulator, movement),
            }
        }
        CostSourcing::RunningAverage if movement.calc_flag == CalcFlag::Inbound => {
            let applied = accumulator.apply_inbound_at_average(qty);
            (applied.line_average, applied.amount)
        }
        _ => apply_own_cost(accumulator, movement),
    };

    Ok(derive(accumulator, cost_per_unit, total_cost))
}

fn apply_own_cost(accumulator: &mut CostAccumulator, movement: &Movement) -> (Decimal, Decimal) {
    match movement.calc_flag {
        CalcFlag::Inbound => {
            let applied = accumulator.apply_inbound(movement.qty, movement.amount);
            (applied.line_average, applied.amount)
        }
        CalcFlag::Outbound => {
            let applied = accumulator.apply_outbound(movement.qty);
            (applied.average_cost_used, applied.cost_removed)
        }
    }
}

/// Average cost left by the first earlier line of the referenced document.
fn resolve_reference(
    key: &ItemKey,
    movement: &Movement,
    document_rates: &HashMap<String, Decimal>,
    policy: MissingReferencePolicy,
    observer: &dyn RecomputeObserver,
) -> Result<Option<Decimal>, RecomputeError> {
    if let Some(rate) = movement
        .reference()
        .and_then(|doc_ref| document_rates.get(doc_ref).copied())
    {
        return Ok(Some(rate));
    }

    observer.observe(Diagnostic::ReferenceMissing {
        key: key.clone(),
        row_id: movement.row_id,
        doc_no: movement.doc_no.clone(),
        doc_ref: movement.doc_ref.clone(),
        policy,
    });

    match policy {
        MissingReferencePolicy::ZeroCost => Ok(Some(Decimal::ZERO)),
        MissingReferencePolicy::RunningAverage => Ok(None),
        MissingReferencePolicy::Fail => Err(RecomputeError::MissingReference {
            key: key.clone(),
            row_id: movement.row_id,
            doc_no: movement.doc_no.clone(),
            doc_ref: movement.doc_ref.clone(),
        }),
    }
}

fn derive(accumulator: &CostAccumulator, cost_per_unit: Decimal, total_cost: Decimal) -> DerivedCost {
    DerivedCost {
        cost_per_unit,
        total_cost,
        balance_qty: accumulator.balance_qty(),
        balance_amount: accumulator.balance_amount(),
        balance_average: accumulator.average_cost(),
    }
}

/// How much of the position tracker's log still matches the ledger.
#[derive(Debug, Clone, Copy)]
struct TrackedPrefix {
    count: i64,
    verified: usize,
}

impl TrackedPrefix {
    fn covers(&self, len: usize) -> bool {
        self.count == len as i64 && self.verified == len
    }

    fn is_intact(&self) -> bool {
        self.count == self.verified as i64
    }
}

/// Full-replay recompute of one item, serialized per item key.
pub struct Recomputer {
    gateway: Arc<dyn LedgerGateway>,
    locks: Arc<dyn KeyLock>,
    tracker: Option<Arc<dyn PositionTracker>>,
    observer: Arc<dyn RecomputeObserver>,
    settings: RecomputeSettings,
}

impl Recomputer {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        locks: Arc<dyn KeyLock>,
        observer: Arc<dyn RecomputeObserver>,
        settings: RecomputeSettings,
    ) -> Self {
        Self {
            gateway,
            locks,
            tracker: None,
            observer,
            settings,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn PositionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn settings(&self) -> &RecomputeSettings {
        &self.settings
    }

    /// Holds the item lock from before the ledger fetch until after the
    /// balance write, and bounds the work by the configured deadline.
    pub async fn recompute(&self, key: &ItemKey) -> Result<RecomputeOutcome, RecomputeError> {
        let lease = match timeout(self.settings.lock_wait, self.locks.acquire(key)).await {
            Ok(Ok(lease)) => lease,
            Ok(Err(source)) => {
                return Err(RecomputeError::Lock {
                    key: key.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(RecomputeError::LockTimeout {
                    key: key.clone(),
                    waited: self.settings.lock_wait,
                });
            }
        };

        let result = match timeout(self.settings.deadline, self.recompute_locked(key)).await {
            Ok(result) => result,
            Err(_) => Err(RecomputeError::Timeout {
                key: key.clone(),
                deadline: self.settings.deadline,
            }),
        };

        if let Err(err) = self.locks.release(key, lease).await {
            self.observer.observe(Diagnostic::LockReleaseFailed {
                key: key.clone(),
                error: format!("{err:#}"),
            });
        }

        if let Ok(outcome) = &result {
            self.observer.observe(Diagnostic::Completed(outcome.clone()));
        }
        result
    }

    async fn recompute_locked(&self, key: &ItemKey) -> Result<RecomputeOutcome, RecomputeError> {
        let ledger_error = |source| RecomputeError::Ledger {
            key: key.clone(),
            source,
        };

        let mut movements = self
            .gateway
            .fetch_ordered_movements(key)
            .await
            .map_err(ledger_error)?;
        let cached = self.gateway.fetch_balance(key).await.map_err(ledger_error)?;

        if movements.is_empty() {
            return Ok(RecomputeOutcome {
                key: key.clone(),
                status: RecomputeStatus::Empty,
                rows_changed: 0,
                balance_written: false,
                final_balance: cached,
            });
        }
        movements.sort_by(Movement::replay_order);

        let prefix = match self.gate_tracker() {
            Some(tracker) => match tracked_prefix(tracker.as_ref(), key, &movements).await {
                Ok(prefix) => Some(prefix),
                Err(err) => {
                    self.observer.observe(Diagnostic::TrackerUnavailable {
                        key: key.clone(),
                        error: format!("{err:#}"),
                    });
                    None
                }
            },
            None => None,
        };

        if let Some(prefix) = prefix {
            let stored = movements.last().map(|movement| movement.derived.balance());
            if prefix.covers(movements.len()) && cached == stored {
                self.observer
                    .observe(Diagnostic::AlreadyApplied { key: key.clone() });
                return Ok(RecomputeOutcome {
                    key: key.clone(),
                    status: RecomputeStatus::Skipped,
                    rows_changed: 0,
                    balance_written: false,
                    final_balance: cached,
                });
            }
        }

        let replay = replay(key, movements, &self.settings, self.observer.as_ref())?;

        if !replay.changes.is_empty() {
            self.gateway
                .commit_changes(key, &replay.changes)
                .await
                .map_err(ledger_error)?;
        }

        let balance_written = cached != Some(replay.final_balance);
        if balance_written {
            self.gateway
                .update_balance(key, &replay.final_balance)
                .await
                .map_err(|source| RecomputeError::Balance {
                    key: key.clone(),
                    source,
                })?;
        }

        if let Some(tracker) = self.gate_tracker() {
            sync_tracker(tracker.as_ref(), key, &replay, prefix)
                .await
                .map_err(|source| RecomputeError::Tracker {
                    key: key.clone(),
                    source,
                })?;
        }

        let rows_changed = replay.changes.len();
        let status = if rows_changed > 0 || balance_written {
            RecomputeStatus::Applied
        } else {
            RecomputeStatus::Unchanged
        };

        Ok(RecomputeOutcome {
            key: key.clone(),
            status,
            rows_changed,
            balance_written,
            final_balance: Some(replay.final_balance),
        })
    }

    fn gate_tracker(&self) -> Option<&Arc<dyn PositionTracker>> {
        self.tracker
            .as_ref()
            .filter(|_| self.settings.dedup_gate)
    }
}

async fn tracked_prefix(
    tracker: &dyn PositionTracker,
    key: &ItemKey,
    ledger: &[Movement],
) -> anyhow::Result<TrackedPrefix> {
    let logged = tracker.snapshots(key).await?;
    let verified = logged
        .iter()
        .zip(ledger)
        .take_while(|(entry, movement)| **entry == movement.snapshot())
        .count();

    Ok(TrackedPrefix {
        count: logged.len() as i64,
        verified,
    })
}

async fn sync_tracker(
    tracker: &dyn PositionTracker,
    key: &ItemKey,
    replay: &Replay,
    prefix: Option<TrackedPrefix>,
) -> anyhow::Result<()> {
    let snapshots: Vec<MovementSnapshot> = replay.ledger.iter().map(Movement::snapshot).collect();

    match prefix {
        Some(prefix)
            if prefix.is_intact()
                && replay
                    .first_changed
                    .is_none_or(|position| position >= prefix.verified) =>
        {
            for snapshot in &snapshots[prefix.verified..] {
                tracker.append(key, snapshot).await?;
            }
            Ok(())
        }
        _ => tracker.replace(key, &snapshots).await,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use stockledger_core::TransFlag;

    use super::*;
    use crate::observer::TracingObserver;

    fn key() -> ItemKey {
        ItemKey::new("shop-1", "BC-1")
    }

    fn line(row_id: i64, doc_no: &str, flag: TransFlag, calc: CalcFlag, qty: Decimal, amount: Decimal) -> Movement {
        Movement {
            row_id,
            shop_id: "shop-1".to_string(),
            barcode: "BC-1".to_string(),
            doc_no: doc_no.to_string(),
            doc_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            trans_flag: flag,
            calc_flag: calc,
            doc_ref: None,
            qty,
            amount,
            derived: DerivedCost::default(),
        }
    }

    #[test]
    fn policy_parses_config_values() {
        assert_eq!("zero".parse::<MissingReferencePolicy>().unwrap(), MissingReferencePolicy::ZeroCost);
        assert_eq!("Average".parse::<MissingReferencePolicy>().unwrap(), MissingReferencePolicy::RunningAverage);
        assert_eq!("fail".parse::<MissingReferencePolicy>().unwrap(), MissingReferencePolicy::Fail);
        assert!("skip".parse::<MissingReferencePolicy>().is_err());
    }

    #[test]
    fn non_positive_lines_carry_current_balance() {
        let movements = vec![
            line(1, "PO-1", TransFlag::PURCHASE, CalcFlag::Inbound, dec!(10), dec!(50)),
            line(2, "PO-2", TransFlag::PURCHASE, CalcFlag::Inbound, dec!(0), dec!(999)),
        ];
        let replay = replay(&key(), movements, &RecomputeSettings::default(), &TracingObserver).unwrap();
        let zero_line = &replay.ledger[1].derived;
        assert_eq!(zero_line.total_cost, Decimal::ZERO);
        assert_eq!(zero_line.balance_qty, dec!(10));
        assert_eq!(zero_line.balance_average, dec!(5));
    }

    #[test]
    fn referenced_inbound_is_valued_at_borrowed_rate() {
        let mut receive = line(2, "TR-2", TransFlag::STOCK_TRANSFER, CalcFlag::Inbound, dec!(4), dec!(0));
        receive.doc_ref = Some("PO-1".to_string());
        let movements = vec![
            line(1, "PO-1", TransFlag::PURCHASE, CalcFlag::Inbound, dec!(10), dec!(75)),
            receive,
        ];
        let replay = replay(&key(), movements, &RecomputeSettings::default(), &TracingObserver).unwrap();
        let derived = &replay.ledger[1].derived;
        assert_eq!(derived.cost_per_unit, dec!(7.50));
        assert_eq!(derived.total_cost, dec!(30.00));
        assert_eq!(replay.final_balance.amount, dec!(105.00));
    }

    #[test]
    fn borrowed_rate_is_average_after_referenced_line() {
        let mut pickup = line(3, "PU-1", TransFlag::STOCK_PICKUP, CalcFlag::Outbound, dec!(5), dec!(0));
        pickup.doc_ref = Some("PO-2".to_string());
        let movements = vec![
            line(1, "PO-1", TransFlag::PURCHASE, CalcFlag::Inbound, dec!(10), dec!(75)),
            line(2, "PO-2", TransFlag::PURCHASE, CalcFlag::Inbound, dec!(10), dec!(125)),
            pickup,
        ];
        let replay = replay(&key(), movements, &RecomputeSettings::default(), &TracingObserver).unwrap();
        assert_eq!(replay.ledger[1].derived.cost_per_unit, dec!(12.50));
        let derived = &replay.ledger[2].derived;
        assert_eq!(derived.cost_per_unit, dec!(10.00));
        assert_eq!(derived.total_cost, dec!(50.00));
        assert_eq!(derived.balance_amount, dec!(150.00));
    }
}
