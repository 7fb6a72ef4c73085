//! Single-flight TTL cache.

use crate::stats::CacheStats;
use core_runtime::config::CacheConfig;
use core_runtime::events::{CoreEvent, EventBus, SystemEvent};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Normalize a raw input into a cache key (trimmed, case-folded).
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

type SharedCompute<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

struct Flight<V, E> {
    id: u64,
    future: SharedCompute<V, E>,
}

struct Inner<V, E> {
    entries: HashMap<String, CacheEntry<V>>,
    in_flight: HashMap<String, Flight<V, E>>,
    /// Monotonic access counters, kept across refreshes
    access: HashMap<String, u64>,
    next_flight_id: u64,
    hits: u64,
    misses: u64,
    joins: u64,
    evictions: u64,
}

/// Cache of computation results keyed by normalized input.
///
/// `V` and `E` must be `Clone` because one computation's result is handed to
/// every waiter.
pub struct ResultCache<V, E> {
    ttl: Duration,
    popular_min_access: u64,
    inner: Arc<Mutex<Inner<V, E>>>,
    event_bus: Option<EventBus>,
}

impl<V, E> ResultCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty cache.
    ///
    /// # Arguments
    ///
    /// * `config` - Entry TTL and the access threshold for popular keys
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl,
            popular_min_access: config.popular_min_access,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                access: HashMap::new(),
                next_flight_id: 0,
                hits: 0,
                misses: 0,
                joins: 0,
                evictions: 0,
            })),
            event_bus: None,
        }
    }

    /// Emit sweep notifications on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// How long an entry stays live after it is stored.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key`, joining or starting a computation
    /// when there is none.
    ///
    /// The boolean is `true` when this call did not start a computation.
    /// `compute` is invoked lazily, outside the cache lock.
    ///
    /// # Errors
    ///
    /// Returns the computation's error. Errors are shared with every joined
    /// caller and never stored.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_cache::ResultCache;
    /// use core_runtime::config::CacheConfig;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let cache: ResultCache<String, String> = ResultCache::new(&CacheConfig::default());
    /// let (value, cached) = cache
    ///     .get_or_compute("Song", || async { Ok("stream".to_string()) })
    ///     .await
    ///     .unwrap();
    /// assert_eq!((value.as_str(), cached), ("stream", false));
    /// assert_eq!(cache.get(" song "), Some("stream".to_string()));
    /// # });
    /// ```
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let key = normalize_key(key);

        let (future, started) = {
            let mut inner = self.inner.lock();
            *inner.access.entry(key.clone()).or_insert(0) += 1;

            if let Some(entry) = inner.entries.get(&key) {
                if entry.inserted_at.elapsed() <= self.ttl {
                    let value = entry.value.clone();
                    inner.hits += 1;
                    return Ok((value, true));
                }
            }

            if let Some(flight) = inner.in_flight.get(&key) {
                let future = flight.future.clone();
                inner.joins += 1;
                (future, false)
            } else {
                inner.misses += 1;
                inner.next_flight_id += 1;
                let id = inner.next_flight_id;
                let future = self.flight(key.clone(), id, compute);
                inner.in_flight.insert(
                    key.clone(),
                    Flight {
                        id,
                        future: future.clone(),
                    },
                );
                (future, true)
            }
        };

        if !started {
            debug!(key = %key, "Joining in-flight computation");
        }

        future.await.map(|value| (value, !started))
    }

    /// Wrap `compute` so that whoever drives it to completion stores the
    /// result and retires the flight, even if the caller that started it is
    /// gone. A panicking computation also retires its flight before the
    /// panic reaches the waiters, so the next caller starts afresh.
    fn flight<F, Fut>(&self, key: String, id: u64, compute: F) -> SharedCompute<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        async move {
            let outcome = AssertUnwindSafe(async move { compute().await })
                .catch_unwind()
                .await;

            let mut guard = inner.lock();
            if guard.in_flight.get(&key).map(|f| f.id) == Some(id) {
                guard.in_flight.remove(&key);
            }
            let result = match outcome {
                Ok(result) => result,
                Err(panic) => {
                    drop(guard);
                    warn!(key = %key, "Cached computation panicked");
                    std::panic::resume_unwind(panic);
                }
            };
            if let Ok(value) = &result {
                guard.entries.insert(
                    key,
                    CacheEntry {
                        value: value.clone(),
                        inserted_at: Instant::now(),
                    },
                );
            }
            drop(guard);

            result
        }
        .boxed()
        .shared()
    }

    /// Live value for `key` without touching counters.
    pub fn get(&self, key: &str) -> Option<V> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(&normalize_key(key))
            .filter(|entry| entry.inserted_at.elapsed() <= self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Stored value for `key` even if expired (until swept).
    pub fn peek_stale(&self, key: &str) -> Option<V> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(&normalize_key(key))
            .map(|entry| entry.value.clone())
    }

    /// Store `value` with a fresh timestamp. Counters are unchanged.
    pub fn insert(&self, key: &str, value: V) {
        let mut inner = self.inner.lock();
        inner.entries.insert(
            normalize_key(key),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner
            .lock()
            .entries
            .remove(&normalize_key(key))
            .is_some()
    }

    /// Drop every entry and counter. Running computations still complete
    /// and store their results.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.access.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Access count recorded for `key`.
    pub fn access_count(&self, key: &str) -> u64 {
        self.inner
            .lock()
            .access
            .get(&normalize_key(key))
            .copied()
            .unwrap_or(0)
    }

    /// Keys accessed at least `min_access` times, most popular first.
    pub fn popular(&self, limit: usize, min_access: u64) -> Vec<(String, u64)> {
        let inner = self.inner.lock();
        let mut ranked: Vec<(String, u64)> = inner
            .access
            .iter()
            .filter(|(_, count)| **count >= min_access)
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        drop(inner);

        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    /// Whether `key` has no live entry.
    pub fn is_expired(&self, key: &str) -> bool {
        self.get(key).is_none()
    }

    /// Evict expired entries. Counters of evicted keys below the popularity
    /// threshold are dropped too.
    #[instrument(skip(self))]
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.entries.remove(key);
            let unpopular = inner
                .access
                .get(key)
                .map_or(true, |count| *count < self.popular_min_access);
            if unpopular && !inner.in_flight.contains_key(key) {
                inner.access.remove(key);
            }
        }

        let evicted = expired.len();
        inner.evictions += evicted as u64;
        let remaining = inner.entries.len();
        drop(inner);

        if evicted > 0 {
            debug!(evicted, remaining, "Cache sweep");
            if let Some(bus) = &self.event_bus {
                bus.emit(CoreEvent::System(SystemEvent::CacheSwept { evicted, remaining }))
                    .ok();
            }
        }

        evicted
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            joins: inner.joins,
            evictions: inner.evictions,
            entries: inner.entries.len(),
            in_flight: inner.in_flight.len(),
        }
    }
}

impl<V, E> fmt::Debug for ResultCache<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("entries", &inner.entries.len())
            .field("in_flight", &inner.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64) -> ResultCache<String, String> {
        ResultCache::new(&CacheConfig::default().with_ttl(Duration::from_secs(ttl_secs)))
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Lofi Beats "), "lofi beats");
        assert_eq!(normalize_key("HTTPS://YOUTU.BE/X"), "https://youtu.be/x");
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = cache(60);

        let (value, cached) = cache
            .get_or_compute("Song", || async { Ok("v1".to_string()) })
            .await
            .unwrap();
        assert_eq!((value.as_str(), cached), ("v1", false));

        let (value, cached) = cache
            .get_or_compute(" song ", || async { Ok("v2".to_string()) })
            .await
            .unwrap();
        assert_eq!((value.as_str(), cached), ("v1", true));
        assert_eq!(cache.access_count("SONG"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = Arc::new(cache(60));
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let key = if i % 2 == 0 { "Lofi" } else { " lofi " };
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key, move || async move {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, String>("stream".to_string())
                    })
                    .await
            }));
        }

        let mut fresh = 0;
        for handle in handles {
            let (value, cached) = handle.await.unwrap().unwrap();
            assert_eq!(value, "stream");
            if !cached {
                fresh += 1;
            }
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(fresh, 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.joins, 7);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache(60);
        cache
            .get_or_compute("a", || async { Ok("first".to_string()) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        let (value, cached) = cache
            .get_or_compute("a", || async { Ok("second".to_string()) })
            .await
            .unwrap();
        assert_eq!((value.as_str(), cached), ("first", true));

        tokio::time::advance(Duration::from_secs(2)).await;
        let (value, cached) = cache
            .get_or_compute("a", || async { Ok("second".to_string()) })
            .await
            .unwrap();
        assert_eq!((value.as_str(), cached), ("second", false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_all_see_failure() {
        let cache = Arc::new(cache(60));
        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("bad", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<String, _>("unavailable".to_string())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        let second = cache
            .get_or_compute("bad", || async { Ok("never".to_string()) })
            .await;

        assert_eq!(second.unwrap_err(), "unavailable");
        assert_eq!(first.await.unwrap().unwrap_err(), "unavailable");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_computation_retires_its_flight() {
        let cache = Arc::new(cache(60));
        let crash = true;
        let crashed = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("crash", move || async move {
                        if crash {
                            panic!("extractor crashed");
                        }
                        Ok::<_, String>("never".to_string())
                    })
                    .await
            })
        };
        assert!(crashed.await.unwrap_err().is_panic());
        assert_eq!(cache.stats().in_flight, 0);

        let (value, cached) = cache
            .get_or_compute("crash", || async { Ok("recovered".to_string()) })
            .await
            .unwrap();
        assert_eq!((value.as_str(), cached), ("recovered", false));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = cache(60);

        let err = cache
            .get_or_compute("x", || async { Err("boom".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
        assert!(cache.is_empty());
        assert_eq!(cache.stats().in_flight, 0);

        let (value, cached) = cache
            .get_or_compute("x", || async { Ok("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!((value.as_str(), cached), ("ok", false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_expired() {
        let cache = cache(10);
        cache.insert("a", "1".to_string());
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.insert("b", "2".to_string());
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.peek_stale("a").as_deref(), Some("1"));
        assert!(cache.get("a").is_none());

        assert_eq!(cache.sweep(), 1);
        assert!(cache.peek_stale("a").is_none());
        assert_eq!(cache.get("b").as_deref(), Some("2"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_popular_ranking() {
        let cache = cache(60);
        for (key, times) in [("a", 3), ("b", 5), ("c", 1), ("d", 3)] {
            for _ in 0..times {
                cache
                    .get_or_compute(key, || async { Ok("v".to_string()) })
                    .await
                    .unwrap();
            }
        }

        assert_eq!(
            cache.popular(10, 3),
            vec![
                ("b".to_string(), 5),
                ("a".to_string(), 3),
                ("d".to_string(), 3)
            ]
        );
        assert_eq!(cache.popular(1, 0), vec![("b".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = cache(60);
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());

        assert!(cache.invalidate("A"));
        assert!(!cache.invalidate("A"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
