use std::any::Any;

use async_trait::async_trait;

use crate::models::{ItemBalance, ItemKey, Movement, MovementSnapshot};

/// Relational stock ledger and item-master balance.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Movements for one item ordered by document date, document number, row id.
    async fn fetch_ordered_movements(&self, key: &ItemKey) -> anyhow::Result<Vec<Movement>>;

    /// Writes derived cost fields of `changes` in a single transaction.
    async fn commit_changes(&self, key: &ItemKey, changes: &[Movement]) -> anyhow::Result<()>;

    async fn fetch_balance(&self, key: &ItemKey) -> anyhow::Result<Option<ItemBalance>>;

    async fn update_balance(&self, key: &ItemKey, balance: &ItemBalance) -> anyhow::Result<()>;
}

/// Ordered log of applied movement snapshots per item.
#[async_trait]
pub trait PositionTracker: Send + Sync {
    async fn append(&self, key: &ItemKey, snapshot: &MovementSnapshot) -> anyhow::Result<()>;

    async fn count(&self, key: &ItemKey) -> anyhow::Result<i64>;

    /// Zero-based position of `snapshot`, or `None` when it was never recorded.
    async fn locate(&self, key: &ItemKey, snapshot: &MovementSnapshot)
    -> anyhow::Result<Option<i64>>;

    /// The whole log for `key` in one read, oldest first.
    async fn snapshots(&self, key: &ItemKey) -> anyhow::Result<Vec<MovementSnapshot>>;

    /// Atomically replaces the whole log for `key`.
    async fn replace(&self, key: &ItemKey, snapshots: &[MovementSnapshot]) -> anyhow::Result<()>;
}

/// Proof of holding the per-item lock.
///
/// Dropping a lease without calling [`KeyLock::release`] frees in-process
/// locks immediately; distributed leases then expire on their TTL.
pub struct KeyLease {
    token: String,
    _hold: Option<Box<dyn Any + Send + Sync>>,
}

impl KeyLease {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            _hold: None,
        }
    }

    pub fn holding(token: impl Into<String>, hold: impl Any + Send + Sync) -> Self {
        Self {
            token: token.into(),
            _hold: Some(Box::new(hold)),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for KeyLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLease").field("token", &self.token).finish()
    }
}

/// Mutual exclusion keyed by item.
#[async_trait]
pub trait KeyLock: Send + Sync {
    /// Waits until the lock for `key` is held.
    async fn acquire(&self, key: &ItemKey) -> anyhow::Result<KeyLease>;

    async fn release(&self, key: &ItemKey, lease: KeyLease) -> anyhow::Result<()>;
}
