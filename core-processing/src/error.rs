use bridge_traits::{ExtractionError, ExtractionErrorKind};
use core_resilience::{BreakerError, RetryError, Transient};
use core_track::{TrackError, TrackStatus};
use std::time::Duration;
use thiserror::Error;

/// Outcome of a failed resolution. Cloned to every single-flight waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Extraction failed, may succeed later: {0}")]
    Transient(String),

    #[error("{0}")]
    Terminal(String),

    #[error("Circuit open for {class}, retry in {retry_after:?}")]
    CircuitOpen { class: String, retry_after: Duration },

    #[error("Extraction timed out: {0}")]
    Timeout(String),
}

impl PipelineError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PipelineError::CircuitOpen { .. })
    }
}

impl Transient for PipelineError {
    fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transient(_) | PipelineError::Timeout(_))
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(err: ExtractionError) -> Self {
        match err.kind {
            ExtractionErrorKind::Transient => PipelineError::Transient(err.message),
            ExtractionErrorKind::Terminal => PipelineError::Terminal(err.message),
            ExtractionErrorKind::Timeout => PipelineError::Timeout(err.message),
        }
    }
}

impl From<RetryError<ExtractionError>> for PipelineError {
    fn from(err: RetryError<ExtractionError>) -> Self {
        match err {
            RetryError::Terminal { last_error, .. } | RetryError::Exhausted { last_error, .. } => {
                last_error.into()
            }
            timeout @ RetryError::Timeout { .. } => PipelineError::Timeout(timeout.to_string()),
        }
    }
}

impl From<BreakerError<RetryError<ExtractionError>>> for PipelineError {
    fn from(err: BreakerError<RetryError<ExtractionError>>) -> Self {
        match err {
            BreakerError::Open { class, retry_after } => {
                PipelineError::CircuitOpen { class, retry_after }
            }
            BreakerError::Inner(inner) => inner.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Processing queue is full ({capacity} tasks)")]
    QueueFull { capacity: usize },

    #[error("Track {0} already has a live task")]
    AlreadyQueued(String),

    #[error("Track {track_id} cannot be processed in status {status}")]
    InvalidTrack { track_id: String, status: TrackStatus },

    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("Task for track {0} was cancelled")]
    Cancelled(String),

    #[error("Timed out after {0:?}")]
    WaitTimeout(Duration),

    #[error("Scheduler is shut down")]
    ShutDown,

    #[error("Workers did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

impl ProcessingError {
    /// Whether the submitter may retry the same call after backing off.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, ProcessingError::QueueFull { .. })
    }
}

impl Transient for ProcessingError {
    fn is_transient(&self) -> bool {
        self.is_queue_full()
    }
}

pub type Result<T> = std::result::Result<T, ProcessingError>;
