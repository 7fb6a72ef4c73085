//! Extraction pipeline: cache, then circuit breaker, then retry executor,
//! then the extraction adapter.

use crate::error::PipelineError;
use async_trait::async_trait;
use bridge_traits::{Clock, ExtractedMedia, ExtractionAdapter, SystemClock};
use chrono::{DateTime, Utc};
use core_cache::ResultCache;
use core_resilience::{CircuitBreaker, CircuitBreakerRegistry, RetryExecutor};
use core_track::SourceKind;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Cached payload. Keeps the original input so an expired entry can be
/// re-extracted with its exact casing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub input: String,
    pub kind: SourceKind,
    pub media: ExtractedMedia,
    /// When the adapter handed out `media.stream_url`. Cache hits keep the
    /// original stamp.
    pub issued_at: DateTime<Utc>,
}

impl ResolvedMedia {
    pub fn new(
        input: impl Into<String>,
        kind: SourceKind,
        media: ExtractedMedia,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            input: input.into(),
            kind,
            media,
            issued_at,
        }
    }
}

pub type MediaCache = ResultCache<ResolvedMedia, PipelineError>;

/// Turns raw inputs into playable media.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve through the shared cache. The flag is `true` when no
    /// extraction was started for this call.
    ///
    /// # Errors
    ///
    /// Returns the classified extraction failure, or a circuit-open error
    /// when the source class is short-circuited.
    async fn resolve(
        &self,
        kind: SourceKind,
        raw: &str,
    ) -> Result<(ResolvedMedia, bool), PipelineError>;

    /// Re-extract, bypassing cached payloads, and store the fresh result.
    async fn refresh(&self, kind: SourceKind, raw: &str) -> Result<ExtractedMedia, PipelineError>;
}

pub struct ExtractionPipeline {
    adapter: Arc<dyn ExtractionAdapter>,
    cache: Arc<MediaCache>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
    clock: Arc<dyn Clock>,
}

impl ExtractionPipeline {
    pub fn new(
        adapter: Arc<dyn ExtractionAdapter>,
        cache: Arc<MediaCache>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            adapter,
            cache,
            breakers,
            retry,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to stamp locator issue times. Defaults to wall time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    async fn extract(
        adapter: Arc<dyn ExtractionAdapter>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryExecutor,
        clock: Arc<dyn Clock>,
        kind: SourceKind,
        input: String,
    ) -> Result<ResolvedMedia, PipelineError> {
        let target = kind.extraction_target(&input);
        debug!(kind = %kind, target = %target, "Extracting");

        let media = breaker
            .call(|| {
                retry.execute("extract", |_attempt| {
                    let adapter = Arc::clone(&adapter);
                    let target = target.clone();
                    async move { adapter.extract(&target).await }
                })
            })
            .await?;

        Ok(ResolvedMedia::new(input, kind, media, clock.now()))
    }

    fn extraction(
        &self,
        kind: SourceKind,
        raw: &str,
    ) -> impl std::future::Future<Output = Result<ResolvedMedia, PipelineError>> + Send + 'static
    {
        Self::extract(
            Arc::clone(&self.adapter),
            self.breakers.get(kind.class()),
            self.retry.clone(),
            Arc::clone(&self.clock),
            kind,
            raw.trim().to_string(),
        )
    }

    /// Re-extract popular keys whose entries have expired.
    ///
    /// Access counters are not touched. Returns how many entries were
    /// refreshed.
    #[instrument(skip(self))]
    pub async fn prewarm(&self, limit: usize, min_access: u64) -> usize {
        let candidates: Vec<(SourceKind, String)> = self
            .cache
            .popular(limit, min_access)
            .into_iter()
            .filter(|(key, _)| self.cache.is_expired(key))
            .filter_map(|(key, _)| match self.cache.peek_stale(&key) {
                Some(stale) => Some((stale.kind, stale.input)),
                // Without a stored payload only search text survives case folding
                None => {
                    let kind = SourceKind::detect(&key);
                    (kind == SourceKind::Search).then_some((kind, key))
                }
            })
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        let total = candidates.len();
        let results = join_all(candidates.into_iter().map(|(kind, input)| {
            let extraction = self.extraction(kind, &input);
            let cache = Arc::clone(&self.cache);
            async move {
                let resolved = extraction.await?;
                cache.insert(&input, resolved);
                Ok::<_, PipelineError>(())
            }
        }))
        .await;

        let warmed = results.iter().filter(|r| r.is_ok()).count();
        info!(candidates = total, warmed, "Pre-warmed popular entries");
        warmed
    }
}

#[async_trait]
impl MediaResolver for ExtractionPipeline {
    #[instrument(skip(self), fields(kind = %kind))]
    async fn resolve(
        &self,
        kind: SourceKind,
        raw: &str,
    ) -> Result<(ResolvedMedia, bool), PipelineError> {
        let extraction = self.extraction(kind, raw);
        self.cache.get_or_compute(raw, move || extraction).await
    }

    #[instrument(skip(self), fields(kind = %kind))]
    async fn refresh(&self, kind: SourceKind, raw: &str) -> Result<ExtractedMedia, PipelineError> {
        let resolved = self.extraction(kind, raw).await?;
        let media = resolved.media.clone();
        self.cache.insert(raw, resolved);
        Ok(media)
    }
}

impl fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("cache", &self.cache)
            .field("breakers", &self.breakers)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{ExtractionError, ManualClock};
    use core_runtime::config::{CacheConfig, CircuitBreakerConfig, RetryConfig};
    use mockall::mock;
    use std::time::Duration;

    mock! {
        pub Adapter {}

        #[async_trait]
        impl ExtractionAdapter for Adapter {
            async fn extract(&self, target: &str) -> Result<ExtractedMedia, ExtractionError>;
        }
    }

    fn media(title: &str) -> ExtractedMedia {
        ExtractedMedia {
            title: title.to_string(),
            contributor: None,
            duration_secs: Some(200),
            thumbnail: None,
            stream_url: format!("https://cdn.example/{}?sig=abc", title),
            webpage_url: None,
        }
    }

    fn pipeline(adapter: MockAdapter, breaker_threshold: u32) -> ExtractionPipeline {
        let cache = Arc::new(ResultCache::new(
            &CacheConfig::default().with_ttl(Duration::from_secs(60)),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default().with_failure_threshold(breaker_threshold),
        ));
        let retry = RetryExecutor::new(
            RetryConfig::default()
                .with_max_attempts(1)
                .with_attempt_timeout(Duration::from_secs(5)),
        );
        ExtractionPipeline::new(Arc::new(adapter), cache, breakers, retry)
    }

    #[tokio::test]
    async fn test_search_is_resolved_once_then_cached() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_extract()
            .withf(|target| target == "ytsearch1:lofi beats")
            .times(1)
            .returning(|_| Ok(media("lofi")));
        let pipeline = pipeline(adapter, 5);

        let (first, cached) = pipeline.resolve(SourceKind::Search, "lofi beats").await.unwrap();
        assert_eq!(first.media.title, "lofi");
        assert!(!cached);

        let (_, cached) = pipeline.resolve(SourceKind::Search, "Lofi Beats ").await.unwrap();
        assert!(cached);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_cached() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_extract()
            .times(2)
            .returning(|_| Err(ExtractionError::terminal("Video unavailable")));
        let pipeline = pipeline(adapter, 5);

        for _ in 0..2 {
            let err = pipeline
                .resolve(SourceKind::YouTube, "https://youtu.be/gone")
                .await
                .unwrap_err();
            assert_eq!(err, PipelineError::Terminal("Video unavailable".to_string()));
        }
        assert!(pipeline.cache().is_empty());
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_extract()
            .times(2)
            .returning(|_| Err(ExtractionError::transient("HTTP Error 503")));
        let pipeline = pipeline(adapter, 2);

        for input in ["https://soundcloud.com/a/1", "https://soundcloud.com/a/2"] {
            let err = pipeline.resolve(SourceKind::SoundCloud, input).await.unwrap_err();
            assert!(matches!(err, PipelineError::Transient(_)));
        }

        let err = pipeline
            .resolve(SourceKind::SoundCloud, "https://soundcloud.com/a/3")
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
    }

    #[tokio::test]
    async fn test_refresh_bypasses_cache() {
        let mut adapter = MockAdapter::new();
        let mut seq = mockall::Sequence::new();
        adapter
            .expect_extract()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(media("old")));
        adapter
            .expect_extract()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(media("new")));
        let pipeline = pipeline(adapter, 5);

        pipeline.resolve(SourceKind::Search, "song").await.unwrap();
        let fresh = pipeline.refresh(SourceKind::Search, "song").await.unwrap();
        assert_eq!(fresh.title, "new");

        let (cached, was_cached) = pipeline.resolve(SourceKind::Search, "song").await.unwrap();
        assert_eq!(cached.media.title, "new");
        assert!(was_cached);
    }

    #[tokio::test]
    async fn test_cache_hit_keeps_original_issue_time() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_extract()
            .times(1)
            .returning(|_| Ok(media("song")));
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let pipeline = pipeline(adapter, 5).with_clock(clock.clone());

        let (first, _) = pipeline.resolve(SourceKind::Search, "song").await.unwrap();
        assert_eq!(first.issued_at, start);

        clock.advance(chrono::Duration::minutes(25));
        let (again, was_cached) = pipeline.resolve(SourceKind::Search, "song").await.unwrap();
        assert!(was_cached);
        assert_eq!(again.issued_at, start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prewarm_refreshes_expired_popular_entries() {
        let mut adapter = MockAdapter::new();
        adapter
            .expect_extract()
            .withf(|target| target == "https://youtu.be/AbC")
            .times(2)
            .returning(|_| Ok(media("hot")));
        adapter
            .expect_extract()
            .withf(|target| target == "ytsearch1:cold")
            .times(1)
            .returning(|_| Ok(media("cold")));
        let pipeline = pipeline(adapter, 5);

        for _ in 0..3 {
            pipeline
                .resolve(SourceKind::YouTube, "https://youtu.be/AbC")
                .await
                .unwrap();
        }
        pipeline.resolve(SourceKind::Search, "cold").await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(pipeline.prewarm(10, 3).await, 1);

        let cache = pipeline.cache();
        assert!(cache.get("https://youtu.be/abc").is_some());
        assert!(cache.get("cold").is_none());
        assert_eq!(cache.access_count("https://youtu.be/AbC"), 3);
    }
}
