use thiserror::Error;

/// Failure reported by a host bridge other than extraction.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host did not provide this capability.
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    /// The host tried and failed; a later attempt may succeed.
    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::OperationFailed(_) | BridgeError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
