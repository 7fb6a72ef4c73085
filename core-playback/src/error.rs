//! # Playback Error Types

use bridge_traits::BridgeError;
use core_processing::{PipelineError, ProcessingError};
use core_track::TrackError;
use thiserror::Error;

/// Errors surfaced by the playback driver and the stream refresher.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Track Errors
    // ========================================================================
    /// Track reached the Failed state and cannot be played.
    #[error("Track {track_id} failed: {message}")]
    TrackFailed { track_id: String, message: String },

    /// Track was Ready but carried no stream locator.
    #[error("Track {0} has no stream locator")]
    MissingLocator(String),

    /// Waiting for a processing track did not complete.
    #[error("Track not ready: {0}")]
    NotReady(#[from] ProcessingError),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// Re-extracting a stream locator failed.
    #[error("Stream refresh failed: {0}")]
    Refresh(#[from] PipelineError),

    /// The output backend refused to open or control a stream.
    #[error("Output error: {0}")]
    Output(#[from] BridgeError),

    // ========================================================================
    // Driver Errors
    // ========================================================================
    /// The session's driver task has exited.
    #[error("Playback driver stopped")]
    DriverStopped,
}

impl PlaybackError {
    /// Returns `true` if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::Refresh(err) => {
                matches!(err, PipelineError::Transient(_) | PipelineError::Timeout(_))
            }
            PlaybackError::NotReady(ProcessingError::WaitTimeout(_)) => true,
            PlaybackError::Output(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
