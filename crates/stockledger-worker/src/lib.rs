pub mod consumer;
pub mod wiring;

pub use consumer::{BulkReport, ConsumeError, ItemFailure, TriggerConsumer};
pub use wiring::build_consumer;
