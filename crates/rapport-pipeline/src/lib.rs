//! Backpressure primitives for the Rapport generation pipeline.
//!
//! Streaming generation runs as a chain of stages (tokens, sentences,
//! audio). Each hop is a [`BoundedQueue`] whose length is hard-capped; a
//! producer that outruns its consumer loses items according to the stage's
//! [`OverflowPolicy`] instead of growing memory. Every drop is counted,
//! logged, and reported to an optional callback.
//!
//! # Modules
//!
//! - [`queue`] -- One bounded FIFO with drop accounting ([`BoundedQueue`])
//! - [`pipeline`] -- Named ordered stages sharing defaults ([`Pipeline`])

pub mod pipeline;
pub mod queue;

// Re-export primary types at crate root for convenience.
pub use pipeline::{DEFAULT_STAGE_CAPACITY, Pipeline, PipelineConfig, StageConfig};
pub use queue::{
    BoundedQueue, DEFAULT_WAIT, DROP_HISTORY, DropCallback, DropRecord, ItemKindFn, MAX_WAIT,
    OverflowPolicy, QueueStats,
};
