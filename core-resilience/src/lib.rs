//! # Resilience Module
//!
//! Failure-handling wrappers around calls to the external extraction tool.
//!
//! - [`RetryExecutor`](retry::RetryExecutor): bounded attempts, per-attempt
//!   timeout, exponential backoff with jitter
//! - [`CircuitBreaker`](circuit_breaker::CircuitBreaker): fails fast while a
//!   class of operations keeps failing, probes for recovery after a cool-down
//!
//! Both consume errors through the [`Transient`](error::Transient)
//! classification: only transient failures are retried or counted against a
//! circuit. Terminal per-item failures pass straight through.

pub mod circuit_breaker;
pub mod error;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use error::{BreakerError, RetryError, Transient};
pub use retry::RetryExecutor;
