//! # Configuration
//!
//! [`CoreConfig`] bundles the injected bridges and the tuning knobs of every
//! core component. It is built through [`CoreConfigBuilder`], which fails fast
//! when a required capability is missing.
//!
//! ## Required bridges
//!
//! - `ExtractionAdapter`: defaults to `bridge_desktop::YtDlpExtractor` when the
//!   `desktop-shims` feature is enabled
//! - `OutputBackend`: always injected by the host
//!
//! ## Example
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SchedulerConfig};
//!
//! let config = CoreConfig::builder()
//!     .extraction_adapter(adapter)
//!     .output_backend(backend)
//!     .scheduler(SchedulerConfig::default().with_workers(8))
//!     .build()?;
//! ```
//!
//! Component configs derive `serde` so hosts can load them from a file:
//!
//! ```ignore
//! let cache: CacheConfig = serde_json::from_str(r#"{ "ttl": { "secs": 600, "nanos": 0 } }"#)?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, ExtractionAdapter, OutputBackend, PlaylistSource, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct CoreConfig {
    pub extraction_adapter: Arc<dyn ExtractionAdapter>,

    pub output_backend: Arc<dyn OutputBackend>,

    /// Source for named playlists. Playlist enqueue is unavailable without it.
    pub playlist_source: Option<Arc<dyn PlaylistSource>>,

    /// Wall clock used for stream locator age.
    pub clock: Arc<dyn Clock>,

    pub event_buffer_size: usize,

    pub scheduler: SchedulerConfig,

    pub cache: CacheConfig,

    pub retry: RetryConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub playback: PlaybackConfig,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("extraction_adapter", &"ExtractionAdapter { ... }")
            .field("output_backend", &"OutputBackend { ... }")
            .field(
                "playlist_source",
                &self
                    .playlist_source
                    .as_ref()
                    .map(|_| "PlaylistSource { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .field("scheduler", &self.scheduler)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("playback", &self.playback)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.scheduler.validate()?;
        self.cache.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.playback.validate()?;

        Ok(())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Worker pool and processing queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of background workers.
    ///
    /// Default: 4.
    pub workers: usize,

    /// Maximum number of queued tasks before `submit` reports `QueueFull`.
    ///
    /// Default: 256.
    pub queue_capacity: usize,

    /// Re-enqueues allowed for a task whose extraction failed transiently.
    ///
    /// Default: 3.
    pub max_retries: u32,

    /// Unit of the task-level backoff `min(2^retry, cap) * unit`.
    ///
    /// Default: 1 second.
    pub retry_delay_unit: Duration,

    /// Upper bound for the task-level backoff.
    ///
    /// Default: 30 seconds.
    pub retry_delay_cap: Duration,

    /// Finished tasks kept for status queries.
    ///
    /// Default: 256.
    pub archive_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            max_retries: 3,
            retry_delay_unit: Duration::from_secs(1),
            retry_delay_cap: Duration::from_secs(30),
            archive_size: 256,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, unit: Duration, cap: Duration) -> Self {
        self.retry_delay_unit = unit;
        self.retry_delay_cap = cap;
        self
    }

    pub fn with_archive_size(mut self, size: usize) -> Self {
        self.archive_size = size;
        self
    }

    /// Delay before the `retry_count`-th re-enqueue.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.retry_delay_unit
            .saturating_mul(factor)
            .min(self.retry_delay_cap)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("Scheduler needs at least one worker".to_string()));
        }
        if self.workers > 64 {
            return Err(Error::Config(
                "Scheduler worker count exceeds maximum of 64".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }
        if self.retry_delay_cap < self.retry_delay_unit {
            return Err(Error::Config(
                "Retry delay cap cannot be smaller than the retry delay unit".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime. Stream locators expire upstream, so keep this well
    /// below their validity.
    ///
    /// Default: 30 minutes.
    pub ttl: Duration,

    /// Period of the background sweep. `None` disables the sweeper and relies
    /// on lazy expiry only.
    ///
    /// Default: 5 minutes.
    pub sweep_interval: Option<Duration>,

    /// Minimum access count for an entry to count as popular.
    ///
    /// Default: 3.
    pub popular_min_access: u64,

    /// Number of popular entries re-resolved by a pre-warm pass.
    ///
    /// Default: 10.
    pub prewarm_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            sweep_interval: Some(Duration::from_secs(5 * 60)),
            popular_min_access: 3,
            prewarm_limit: 10,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_popular_min_access(mut self, min_access: u64) -> Self {
        self.popular_min_access = min_access;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::Config("Cache TTL must be greater than 0".to_string()));
        }
        if matches!(self.sweep_interval, Some(interval) if interval.is_zero()) {
            return Err(Error::Config(
                "Cache sweep interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Per-call retry settings for extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    ///
    /// Default: 3.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    ///
    /// Default: 500 ms.
    pub base_delay: Duration,

    /// Multiplier applied per attempt.
    ///
    /// Default: 2.0.
    pub backoff_factor: f64,

    /// Upper bound for a single backoff delay.
    ///
    /// Default: 10 seconds.
    pub max_delay: Duration,

    /// Limit for a single attempt.
    ///
    /// Default: 45 seconds.
    pub attempt_timeout: Duration,

    /// Relative jitter applied to each delay (0.25 = ±25%).
    ///
    /// Default: 0.25.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(45),
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Retry max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::Config(
                "Retry backoff_factor must be a finite value >= 1.0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::Config(
                "Retry jitter must be in the range [0.0, 1.0)".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(Error::Config(
                "Retry attempt_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Circuit breaker
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    ///
    /// Default: 5.
    pub failure_threshold: u32,

    /// Time spent open before a probe is admitted.
    ///
    /// Default: 60 seconds.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::Config(
                "Circuit breaker failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Playback
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How long a manual stop keeps auto-advance suppressed.
    ///
    /// Default: 750 ms.
    pub suppress_grace: Duration,

    /// How long `play` waits for a still-processing track.
    ///
    /// Default: 60 seconds.
    pub ready_wait_timeout: Duration,

    /// Locators older than this are re-extracted before playing.
    ///
    /// Default: 4 hours.
    pub locator_max_age: Duration,

    /// Refresh and replay once when a stream fails mid-playback.
    ///
    /// Default: true.
    pub replay_on_stream_error: bool,

    /// Bound for acknowledged session teardown.
    ///
    /// Default: 5 seconds.
    pub teardown_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            suppress_grace: Duration::from_millis(750),
            ready_wait_timeout: Duration::from_secs(60),
            locator_max_age: Duration::from_secs(4 * 60 * 60),
            replay_on_stream_error: true,
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

impl PlaybackConfig {
    pub fn with_suppress_grace(mut self, grace: Duration) -> Self {
        self.suppress_grace = grace;
        self
    }

    pub fn with_ready_wait_timeout(mut self, timeout: Duration) -> Self {
        self.ready_wait_timeout = timeout;
        self
    }

    pub fn with_locator_max_age(mut self, age: Duration) -> Self {
        self.locator_max_age = age;
        self
    }

    pub fn with_replay_on_stream_error(mut self, enabled: bool) -> Self {
        self.replay_on_stream_error = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.suppress_grace.is_zero() {
            return Err(Error::Config(
                "Playback suppress_grace must be greater than 0".to_string(),
            ));
        }
        if self.locator_max_age.is_zero() {
            return Err(Error::Config(
                "Playback locator_max_age must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

#[cfg(not(feature = "desktop-shims"))]
fn extraction_adapter_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "ExtractionAdapter".to_string(),
        message: "An ExtractionAdapter is required to resolve requests into streams. \
                 Desktop: enable the 'desktop-shims' feature to use the default YtDlpExtractor. \
                 Otherwise inject an adapter with .extraction_adapter()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_extraction_adapter() -> Result<Arc<dyn ExtractionAdapter>> {
    use bridge_desktop::YtDlpExtractor;

    let adapter: Arc<dyn ExtractionAdapter> = Arc::new(YtDlpExtractor::new());
    Ok(adapter)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_extraction_adapter() -> Result<Arc<dyn ExtractionAdapter>> {
    Err(extraction_adapter_missing_error())
}

#[derive(Default)]
pub struct CoreConfigBuilder {
    extraction_adapter: Option<Arc<dyn ExtractionAdapter>>,
    output_backend: Option<Arc<dyn OutputBackend>>,
    playlist_source: Option<Arc<dyn PlaylistSource>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    scheduler: Option<SchedulerConfig>,
    cache: Option<CacheConfig>,
    retry: Option<RetryConfig>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    playback: Option<PlaybackConfig>,
}

impl CoreConfigBuilder {
    pub fn extraction_adapter(mut self, adapter: Arc<dyn ExtractionAdapter>) -> Self {
        self.extraction_adapter = Some(adapter);
        self
    }

    pub fn output_backend(mut self, backend: Arc<dyn OutputBackend>) -> Self {
        self.output_backend = Some(backend);
        self
    }

    pub fn playlist_source(mut self, source: Arc<dyn PlaylistSource>) -> Self {
        self.playlist_source = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = Some(config);
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn playback(mut self, config: PlaybackConfig) -> Self {
        self.playback = Some(config);
        self
    }

    pub fn build(self) -> Result<CoreConfig> {
        let output_backend = self.output_backend.ok_or_else(|| Error::CapabilityMissing {
            capability: "OutputBackend".to_string(),
            message: "An OutputBackend is required to play resolved streams. \
                     Inject the host's audio output with .output_backend()."
                .to_string(),
        })?;

        let extraction_adapter = match self.extraction_adapter {
            Some(adapter) => adapter,
            None => provide_default_extraction_adapter()?,
        };

        let config = CoreConfig {
            extraction_adapter,
            output_backend,
            playlist_source: self.playlist_source,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            scheduler: self.scheduler.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
            circuit_breaker: self.circuit_breaker.unwrap_or_default(),
            playback: self.playback.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        CompletionCallback, ExtractedMedia, ExtractionError, OutputHandle,
    };

    struct NullExtractor;

    #[async_trait]
    impl ExtractionAdapter for NullExtractor {
        async fn extract(
            &self,
            _target: &str,
        ) -> std::result::Result<ExtractedMedia, ExtractionError> {
            Err(ExtractionError::terminal("unused"))
        }
    }

    struct NullBackend;

    #[async_trait]
    impl OutputBackend for NullBackend {
        async fn open(
            &self,
            _locator: &str,
            _on_complete: CompletionCallback,
        ) -> bridge_traits::error::Result<Box<dyn OutputHandle>> {
            Err(bridge_traits::BridgeError::NotAvailable("unused".to_string()))
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .extraction_adapter(Arc::new(NullExtractor))
            .output_backend(Arc::new(NullBackend))
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().build().unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.cache.ttl, Duration::from_secs(1800));
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.playlist_source.is_none());
    }

    #[test]
    fn test_builder_requires_output_backend() {
        let result = CoreConfig::builder()
            .extraction_adapter(Arc::new(NullExtractor))
            .build();

        let err = result.unwrap_err();
        assert!(err.is_capability_missing());
        assert!(matches!(
            err,
            Error::CapabilityMissing { ref capability, .. } if capability == "OutputBackend"
        ));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_extraction_adapter() {
        let result = CoreConfig::builder()
            .output_backend(Arc::new(NullBackend))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("ExtractionAdapter"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_builder_uses_default_extractor() {
        let result = CoreConfig::builder()
            .output_backend(Arc::new(NullBackend))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_builder_rejects_invalid_component_config() {
        let result = builder()
            .scheduler(SchedulerConfig::default().with_workers(0))
            .build();
        assert!(result.unwrap_err().to_string().contains("at least one worker"));

        let result = builder()
            .retry(RetryConfig::default().with_jitter(1.5))
            .build();
        assert!(result.unwrap_err().to_string().contains("jitter"));

        let result = builder()
            .cache(CacheConfig::default().with_ttl(Duration::ZERO))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_scheduler_retry_delay_is_capped() {
        let config = SchedulerConfig::default()
            .with_retry_delay(Duration::from_secs(1), Duration::from_secs(5));

        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(2), Duration::from_secs(4));
        assert_eq!(config.retry_delay(3), Duration::from_secs(5));
        assert_eq!(config.retry_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_component_config_deserializes_with_defaults() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{ "failure_threshold": 2 }"#).unwrap();
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("ExtractionAdapter { ... }"));
    }
}
