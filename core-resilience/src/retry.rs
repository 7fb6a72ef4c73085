//! Retry executor.
//!
//! Runs an async operation up to `max_attempts` times. Each attempt is bounded
//! by `attempt_timeout`; between attempts the executor sleeps
//! `base_delay * backoff_factor^attempt` (capped at `max_delay`) with uniform
//! jitter. Terminal errors end the loop immediately.

use crate::error::{RetryError, Transient};
use core_runtime::config::RetryConfig;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

enum LastFailure<E> {
    Error(E),
    Timeout,
}

/// Stateless, cloneable retry policy.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.config.base_delay.as_secs_f64() * self.config.backoff_factor.powi(exponent);
        let capped = secs.min(self.config.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.config.max_delay
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.config.jitter;
        if jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        delay.mul_f64(factor.max(0.0))
    }

    /// Run `operation` under the retry policy.
    ///
    /// The closure receives the zero-based attempt number.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last = LastFailure::Timeout;

        for attempt in 0..max_attempts {
            match timeout(self.config.attempt_timeout, operation(attempt)).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Ok(Err(e)) if !e.is_transient() => {
                    debug!(operation = operation_name, error = %e, "Terminal failure, not retrying");
                    return Err(RetryError::Terminal {
                        operation: operation_name.to_string(),
                        last_error: e,
                    });
                }
                Ok(Err(e)) => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Transient failure"
                    );
                    last = LastFailure::Error(e);
                }
                Err(_) => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts,
                        timeout_ms = self.config.attempt_timeout.as_millis() as u64,
                        "Attempt timed out"
                    );
                    last = LastFailure::Timeout;
                }
            }

            if attempt + 1 < max_attempts {
                let delay = self.jittered(self.backoff(attempt));
                debug!(
                    operation = operation_name,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                sleep(delay).await;
            }
        }

        Err(match last {
            LastFailure::Error(last_error) => RetryError::Exhausted {
                operation: operation_name.to_string(),
                attempts: max_attempts,
                last_error,
            },
            LastFailure::Timeout => RetryError::Timeout {
                operation: operation_name.to_string(),
                attempts: max_attempts,
                timeout: self.config.attempt_timeout,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ExtractionError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::default()
                .with_max_attempts(max_attempts)
                .with_base_delay(Duration::from_millis(100))
                .with_attempt_timeout(Duration::from_secs(1)),
        )
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let executor = RetryExecutor::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(1000),
            ..RetryConfig::default()
        });

        assert_eq!(executor.backoff(0), Duration::from_millis(100));
        assert_eq!(executor.backoff(1), Duration::from_millis(200));
        assert_eq!(executor.backoff(2), Duration::from_millis(400));
        assert_eq!(executor.backoff(4), Duration::from_millis(1000));
        assert_eq!(executor.backoff(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let executor = RetryExecutor::new(RetryConfig::default().with_jitter(0.25));
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            let delay = executor.jittered(base);
            assert!(delay >= Duration::from_millis(750), "{:?}", delay);
            assert!(delay <= Duration::from_millis(1250), "{:?}", delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<&str, _> = executor(3)
            .execute("extract", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ExtractionError::transient("HTTP Error 429"))
                    } else {
                        Ok("stream")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "stream");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = executor(5)
            .execute("extract", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ExtractionError::terminal("Video unavailable")) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Terminal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let result: Result<(), _> = executor(3)
            .execute("extract", |attempt| async move {
                Err(ExtractionError::transient(format!("attempt {}", attempt)))
            })
            .await;

        match result {
            Err(RetryError::Exhausted {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.message, "attempt 2");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), RetryError<ExtractionError>> = executor(2)
            .execute("extract", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_transient());
        assert!(err.last_error().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let executor = RetryExecutor::new(
            RetryConfig::default()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_secs(1))
                .with_jitter(0.0),
        );

        let _: Result<(), _> = executor
            .execute("extract", |_| async {
                Err(ExtractionError::transient("flaky"))
            })
            .await;

        // 1s after the first failure, 2s after the second
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
