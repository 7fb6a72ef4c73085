//! # Processing Module
//!
//! Turns pending tracks into playable ones in the background.
//!
//! - [`ExtractionPipeline`](pipeline::ExtractionPipeline): result cache in
//!   front of a per-source circuit breaker, a retry executor and the
//!   extraction adapter
//! - [`Scheduler`](scheduler::Scheduler): bounded priority queue and worker
//!   pool with task-level retries, cancellation and progress events
//! - [`ProcessingTask`](task::ProcessingTask): scheduling state of one track

pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod task;

pub use error::{PipelineError, ProcessingError, Result};
pub use pipeline::{ExtractionPipeline, MediaCache, MediaResolver, ResolvedMedia};
pub use scheduler::{Scheduler, SchedulerStats, TrackWaiter};
pub use task::{Priority, ProcessingTask, TaskCallback, TaskId, TaskStatus};
