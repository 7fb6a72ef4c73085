use bridge_traits::ExtractionError;
use std::time::Duration;
use thiserror::Error;

/// Classification consumed by the retry executor and circuit breaker.
pub trait Transient {
    /// Whether the same call may succeed if repeated later.
    fn is_transient(&self) -> bool;
}

impl Transient for ExtractionError {
    fn is_transient(&self) -> bool {
        ExtractionError::is_transient(self)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    #[error("{operation} failed permanently: {last_error}")]
    Terminal { operation: String, last_error: E },

    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: E,
    },

    #[error("{operation} timed out after {attempts} attempt(s) ({timeout:?} each)")]
    Timeout {
        operation: String,
        attempts: u32,
        timeout: Duration,
    },
}

impl<E> RetryError<E> {
    /// The underlying error of the last attempt, if it did not time out.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Terminal { last_error, .. } | RetryError::Exhausted { last_error, .. } => {
                Some(last_error)
            }
            RetryError::Timeout { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }
}

impl<E> Transient for RetryError<E> {
    fn is_transient(&self) -> bool {
        !matches!(self, RetryError::Terminal { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BreakerError<E> {
    #[error("Circuit open for {class}, retry in {retry_after:?}")]
    Open { class: String, retry_after: Duration },

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}
