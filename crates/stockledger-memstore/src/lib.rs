pub mod ledger;
pub mod locks;
pub mod tracker;

pub use ledger::InMemoryLedger;
pub use locks::LocalKeyLocks;
pub use tracker::InMemoryPositionTracker;
