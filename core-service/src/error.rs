use core_playback::PlaybackError;
use core_processing::ProcessingError;
use core_resilience::RetryError;
use core_track::TrackError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Session not open: {0}")]
    UnknownSession(String),

    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    #[error("Invalid request: {0}")]
    Track(#[from] TrackError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),
}

impl CoreError {
    /// Whether the request was refused because the queue is saturated.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, CoreError::Processing(err) if err.is_queue_full())
    }
}

impl From<RetryError<ProcessingError>> for CoreError {
    fn from(err: RetryError<ProcessingError>) -> Self {
        match err {
            RetryError::Terminal { last_error, .. } | RetryError::Exhausted { last_error, .. } => {
                CoreError::Processing(last_error)
            }
            RetryError::Timeout { timeout, .. } => {
                CoreError::Processing(ProcessingError::WaitTimeout(timeout))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
