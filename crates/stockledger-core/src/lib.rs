pub mod events;
pub mod flags;
pub mod models;
pub mod storage;

pub use events::{RECOMPUTE_CHANNELS, RecomputeRequest, StockProcessEvent};
pub use flags::{CalcFlag, CostSourcing, TransFlag};
pub use models::{DerivedCost, ItemBalance, ItemKey, Movement, MovementSnapshot};
pub use storage::{KeyLease, KeyLock, LedgerGateway, PositionTracker};
