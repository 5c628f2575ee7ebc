pub mod accumulator;
pub mod error;
pub mod observer;
pub mod recompute;

pub use accumulator::{CostAccumulator, DEFAULT_PRECISION, InboundApplied, OutboundApplied};
pub use error::RecomputeError;
pub use observer::{Diagnostic, RecomputeObserver, TracingObserver};
pub use recompute::{
    MissingReferencePolicy, RecomputeOutcome, RecomputeSettings, RecomputeStatus, Recomputer,
    Replay, replay,
};
