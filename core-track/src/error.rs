use crate::models::TrackStatus;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("Invalid track transition from {from} to {to}")]
    InvalidTransition { from: TrackStatus, to: TrackStatus },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Position {position} out of range (len {len})")]
    OutOfRange { position: usize, len: usize },

    #[error("Cannot remove the current track at position {0}")]
    RemoveCurrent(usize),

    #[error("Inconsistent track record: {0}")]
    InconsistentRecord(String),
}

pub type Result<T> = std::result::Result<T, TrackError>;
