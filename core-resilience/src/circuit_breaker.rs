//! Circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────> Open
//!     ^                                 │ recovery_timeout elapsed
//!     │ probe succeeded                 v
//!     └──────────────────────────── HalfOpen ──(probe failed)──> Open
//! ```
//!
//! While half-open exactly one probe call is admitted; concurrent callers fail
//! fast. Only transient failures count toward the threshold.

use crate::error::{BreakerError, Transient};
use core_runtime::config::CircuitBreakerConfig;
use core_runtime::events::{CoreEvent, EventBus, SystemEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Releases the half-open probe slot if the probe future is dropped early.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.state.lock().probe_in_flight = false;
        }
    }
}

/// Failure gate for one operation class (e.g. `youtube`).
pub struct CircuitBreaker {
    class: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    event_bus: Option<EventBus>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// # Arguments
    ///
    /// * `class` - Operation class named in events and errors
    /// * `config` - Failure threshold and recovery timeout
    pub fn new(class: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            class: class.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            event_bus: None,
        }
    }

    /// Emit state transitions on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Current state, accounting for an elapsed recovery timeout.
    pub fn state(&self) -> CircuitState {
        let guard = self.state.lock();
        match (guard.state, guard.opened_at) {
            (CircuitState::Open, Some(opened_at))
                if opened_at.elapsed() >= self.config.recovery_timeout =>
            {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// Transient failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Run `operation` through the breaker.
    ///
    /// Only transient errors count towards the failure threshold.
    ///
    /// # Errors
    ///
    /// Returns `BreakerError::Open` without running `operation` while the
    /// circuit is open or another half-open trial is running, and wraps
    /// the operation's own error otherwise.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient,
    {
        let admission = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(),
            Err(e) if e.is_transient() => self.on_failure(admission),
            Err(_) => {
                if admission == Admission::Probe {
                    self.state.lock().probe_in_flight = false;
                }
            }
        }

        result.map_err(BreakerError::Inner)
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.recovery_timeout);
                if elapsed < self.config.recovery_timeout {
                    return Err(BreakerError::Open {
                        class: self.class.clone(),
                        retry_after: self.config.recovery_timeout - elapsed,
                    });
                }
                state.state = CircuitState::HalfOpen;
                state.probe_in_flight = true;
                info!(class = %self.class, "Circuit half-open, admitting probe");
                Ok(Admission::Probe)
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    return Err(BreakerError::Open {
                        class: self.class.clone(),
                        retry_after: Duration::ZERO,
                    });
                }
                state.probe_in_flight = true;
                Ok(Admission::Probe)
            }
        }
    }

    fn on_success(&self) {
        let closed = {
            let mut state = self.state.lock();
            let was_closed = state.state == CircuitState::Closed;
            state.state = CircuitState::Closed;
            state.consecutive_failures = 0;
            state.opened_at = None;
            state.probe_in_flight = false;
            !was_closed
        };

        if closed {
            info!(class = %self.class, "Circuit closed");
            self.emit(SystemEvent::CircuitClosed {
                class: self.class.clone(),
            });
        }
    }

    fn on_failure(&self, admission: Admission) {
        let opened = {
            let mut state = self.state.lock();
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);

            match (admission, state.state) {
                (Admission::Probe, _) => {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    state.probe_in_flight = false;
                    Some(state.consecutive_failures)
                }
                (Admission::Normal, CircuitState::Closed)
                    if state.consecutive_failures >= self.config.failure_threshold =>
                {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    Some(state.consecutive_failures)
                }
                _ => None,
            }
        };

        if let Some(failures) = opened {
            warn!(
                class = %self.class,
                failures,
                recovery_secs = self.config.recovery_timeout.as_secs(),
                "Circuit opened"
            );
            self.emit(SystemEvent::CircuitOpened {
                class: self.class.clone(),
                failures,
            });
        }
    }

    fn emit(&self, event: SystemEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::System(event)).ok();
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("class", &self.class)
            .field("state", &self.state())
            .finish()
    }
}

/// One breaker per operation class, created on first use.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    event_bus: Option<EventBus>,
}

impl CircuitBreakerRegistry {
    /// Empty registry. Every breaker it creates shares `config`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Breaker for `class`, created closed on first use.
    pub fn get(&self, class: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(class.to_string()).or_insert_with(|| {
            let mut breaker = CircuitBreaker::new(class, self.config.clone());
            if let Some(bus) = &self.event_bus {
                breaker = breaker.with_event_bus(bus.clone());
            }
            Arc::new(breaker)
        });
        Arc::clone(breaker)
    }

    /// Snapshot of every known breaker, sorted by class.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.lock().values().cloned().collect();
        let mut states: Vec<(String, CircuitState)> = breakers
            .iter()
            .map(|b| (b.class().to_string(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ExtractionError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "youtube",
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_recovery_timeout(Duration::from_secs(30)),
        )
    }

    async fn fail_transient(b: &CircuitBreaker) -> Result<(), BreakerError<ExtractionError>> {
        b.call(|| async { Err::<(), _>(ExtractionError::transient("503")) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), BreakerError<ExtractionError>> {
        b.call(|| async { Ok::<(), ExtractionError>(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let b = breaker(3);
        for _ in 0..3 {
            assert!(matches!(fail_transient(&b).await, Err(BreakerError::Inner(_))));
        }
        assert_eq!(b.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result = b
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ExtractionError>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failures_do_not_count() {
        let b = breaker(2);
        for _ in 0..10 {
            let result = b
                .call(|| async { Err::<(), _>(ExtractionError::terminal("Private video")) })
                .await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let b = breaker(3);
        fail_transient(&b).await.ok();
        fail_transient(&b).await.ok();
        succeed(&b).await.unwrap();
        fail_transient(&b).await.ok();
        fail_transient(&b).await.ok();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_closes_on_success() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let b = breaker(1).with_event_bus(bus.clone());

        fail_transient(&b).await.ok();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);

        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::System(SystemEvent::CircuitOpened { failures: 1, .. })
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::System(SystemEvent::CircuitClosed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_and_resets_timer() {
        let b = breaker(1);
        fail_transient(&b).await.ok();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(fail_transient(&b).await, Err(BreakerError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        match succeed(&b).await {
            Err(BreakerError::Open { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(20));
            }
            other => panic!("expected open circuit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_in_half_open() {
        let b = breaker(1);
        fail_transient(&b).await.ok();
        tokio::time::advance(Duration::from_secs(31)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = b.call(|| async move {
            release_rx.await.ok();
            Ok::<(), ExtractionError>(())
        });
        let concurrent = async {
            tokio::task::yield_now().await;
            let result = succeed(&b).await;
            release_tx.send(()).ok();
            result
        };

        let (probe_result, concurrent_result) = futures::join!(probe, concurrent);
        assert!(probe_result.is_ok());
        assert!(matches!(concurrent_result, Err(BreakerError::Open { .. })));
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let b = breaker(1);
        fail_transient(&b).await.ok();
        tokio::time::advance(Duration::from_secs(31)).await;

        {
            let probe = b.call(|| async {
                std::future::pending::<()>().await;
                Ok::<(), ExtractionError>(())
            });
            let _ = tokio::time::timeout(Duration::from_millis(10), probe).await;
        }

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("youtube");
        let b = registry.get("youtube");
        let c = registry.get("soundcloud");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(
            registry.states(),
            vec![
                ("soundcloud".to_string(), CircuitState::Closed),
                ("youtube".to_string(), CircuitState::Closed),
            ]
        );
    }
}
