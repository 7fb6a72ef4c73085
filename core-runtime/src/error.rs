//! Errors raised while assembling the runtime.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A component setting is out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A required host bridge was not injected.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl Error {
    pub fn is_capability_missing(&self) -> bool {
        matches!(self, Error::CapabilityMissing { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
