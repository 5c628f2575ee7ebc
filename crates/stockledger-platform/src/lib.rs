pub mod config;
pub mod db;
pub mod lease;
pub mod ledger;
pub mod redis_bus;
pub mod tracker;

pub use config::{LockBackend, RetryConfig, WorkerConfig};
pub use db::connect_database;
pub use lease::RedisKeyLock;
pub use ledger::PgLedgerGateway;
pub use redis_bus::RedisBus;
pub use tracker::RedisPositionTracker;
