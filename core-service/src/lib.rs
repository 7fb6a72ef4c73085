//! Core service façade.
//!
//! [`CoreService`] wires the host bridges from a
//! [`CoreConfig`](core_runtime::config::CoreConfig) into the processing and
//! playback components and owns them for the lifetime of the process. There
//! are no globals: every cache, breaker registry and worker pool belongs to a
//! service value and is drained by [`CoreService::shutdown`].
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .output_backend(Arc::new(MyVoiceOutput::new()))
//!     .build()?;
//! let core = CoreService::new(config);
//!
//! let session = SessionId::new("guild-1");
//! core.request(&session, RequesterId::new("alice"), "never gonna give you up", Priority::Normal)
//!     .await?;
//! ```
//!
//! Desktop hosts get the `yt-dlp` based extractor by default through the
//! `desktop-shims` feature.

pub mod error;

pub use error::{CoreError, Result};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use bridge_desktop::{YtDlpConfig, YtDlpExtractor};

use bridge_traits::{BridgeError, OutputBackend, PlaylistSource};
use core_cache::CacheStats;
use core_playback::{DriverContext, DriverHandle, PlaybackDriver, StreamRefresher};
use core_processing::{
    ExtractionPipeline, MediaCache, Priority, ProcessingError, ProcessingTask, Scheduler,
    SchedulerStats, TaskCallback, TaskId,
};
use core_resilience::{CircuitBreakerRegistry, RetryExecutor};
use core_runtime::config::{CacheConfig, CoreConfig, PlaybackConfig};
use core_runtime::events::{CoreEvent, EventBus};
use core_track::{RequesterId, SessionId, Track};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Counters across the whole service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub scheduler: SchedulerStats,
    pub cache: CacheStats,
    pub sessions: usize,
}

struct ServiceInner {
    event_bus: EventBus,
    output_backend: Arc<dyn OutputBackend>,
    playlist_source: Option<Arc<dyn PlaylistSource>>,
    cache_config: CacheConfig,
    playback: PlaybackConfig,
    pipeline: Arc<ExtractionPipeline>,
    scheduler: Arc<Scheduler>,
    refresher: Arc<StreamRefresher>,
    submit_retry: RetryExecutor,
    sessions: Mutex<HashMap<SessionId, DriverHandle>>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

impl CoreService {
    /// Build every component and start the worker pool (and the cache
    /// sweeper when enabled). Must be called from within a tokio runtime.
    pub fn new(config: CoreConfig) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);

        let cache = Arc::new(MediaCache::new(&config.cache).with_event_bus(event_bus.clone()));
        let breakers = Arc::new(
            CircuitBreakerRegistry::new(config.circuit_breaker.clone())
                .with_event_bus(event_bus.clone()),
        );
        let pipeline = Arc::new(
            ExtractionPipeline::new(
                config.extraction_adapter.clone(),
                cache.clone(),
                breakers,
                RetryExecutor::new(config.retry.clone()),
            )
            .with_clock(config.clock.clone()),
        );

        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            pipeline.clone(),
            event_bus.clone(),
        ));
        scheduler.start();

        let refresher = Arc::new(
            StreamRefresher::new(
                pipeline.clone(),
                config.clock.clone(),
                config.playback.locator_max_age,
            )
            .with_event_bus(event_bus.clone()),
        );

        let shutdown = CancellationToken::new();
        let sweeper = config
            .cache
            .sweep_interval
            .map(|interval| cache.spawn_sweeper(interval, shutdown.child_token()));

        info!(
            workers = config.scheduler.workers,
            queue_capacity = config.scheduler.queue_capacity,
            sweeper = sweeper.is_some(),
            "Core service started"
        );

        Self {
            inner: Arc::new(ServiceInner {
                event_bus,
                output_backend: config.output_backend,
                playlist_source: config.playlist_source,
                cache_config: config.cache,
                playback: config.playback,
                pipeline,
                scheduler,
                refresher,
                submit_retry: RetryExecutor::new(config.retry),
                sessions: Mutex::new(HashMap::new()),
                shutdown,
                sweeper: Mutex::new(sweeper),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// Driver handle for `session_id`, spawning the driver on first use.
    pub fn open_session(&self, session_id: &SessionId) -> DriverHandle {
        let mut sessions = self.inner.sessions.lock();
        if let Some(handle) = sessions.get(session_id).filter(|h| !h.is_closed()) {
            return handle.clone();
        }

        let handle = PlaybackDriver::spawn(
            session_id.clone(),
            DriverContext {
                config: self.inner.playback.clone(),
                backend: self.inner.output_backend.clone(),
                refresher: self.inner.refresher.clone(),
                waiter: self.inner.scheduler.clone(),
                event_bus: self.inner.event_bus.clone(),
            },
        );
        sessions.insert(session_id.clone(), handle.clone());
        debug!(session_id = %session_id, "Session opened");
        handle
    }

    pub fn session(&self, session_id: &SessionId) -> Option<DriverHandle> {
        self.inner.sessions.lock().get(session_id).cloned()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.sessions.lock().keys().cloned().collect()
    }

    /// Stop playback without auto-advance, clear the Tracklist and cancel the
    /// session's outstanding tasks.
    ///
    /// Returns whether every cancelled task acknowledged within
    /// `teardown_timeout`. Closing an unknown session is a no-op.
    #[instrument(skip(self, session_id), fields(session_id = %session_id))]
    pub async fn close_session(&self, session_id: &SessionId) -> Result<bool> {
        let handle = self.inner.sessions.lock().remove(session_id);
        let Some(handle) = handle else {
            return Ok(true);
        };

        let scheduler = &self.inner.scheduler;
        let cancelled = scheduler.cancel_session(session_id);

        // The driver may already be gone; teardown continues regardless.
        if let Err(err) = handle.shutdown().await {
            debug!(error = %err, "Driver already stopped");
        }

        let acknowledged = scheduler
            .await_session_idle(session_id, self.inner.playback.teardown_timeout)
            .await;
        if acknowledged {
            info!(cancelled, "Session closed");
        } else {
            warn!(
                cancelled,
                timeout_ms = self.inner.playback.teardown_timeout.as_millis() as u64,
                "Session closed before all tasks acknowledged cancellation"
            );
        }
        Ok(acknowledged)
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Submit `raw` for resolution. Once Ready the track is appended to the
    /// session's Tracklist (which opens the session if needed).
    ///
    /// A saturated queue is retried with backoff before giving up with
    /// [`ProcessingError::QueueFull`](core_processing::ProcessingError::QueueFull).
    #[instrument(skip(self, session_id, requester, raw, priority), fields(session_id = %session_id, priority = %priority))]
    pub async fn request(
        &self,
        session_id: &SessionId,
        requester: RequesterId,
        raw: &str,
        priority: Priority,
    ) -> Result<TaskId> {
        self.ensure_running()?;
        let track = Track::new(raw, requester, session_id.clone())?;
        let handle = self.open_session(session_id);
        self.submit(track, priority, handle).await
    }

    /// Submit every input of the named playlist. The first item plays next at
    /// normal priority; the rest resolve in the background at low priority.
    #[instrument(skip(self, session_id, requester), fields(session_id = %session_id))]
    pub async fn enqueue_playlist(
        &self,
        session_id: &SessionId,
        requester: RequesterId,
        name: &str,
    ) -> Result<Vec<TaskId>> {
        self.ensure_running()?;
        let source = self
            .inner
            .playlist_source
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "PlaylistSource".to_string(),
                message: "Inject a playlist source with .playlist_source() to enqueue playlists."
                    .to_string(),
            })?;

        let inputs = source.load(name).await.map_err(|err| match err {
            BridgeError::NotFound(_) => CoreError::PlaylistNotFound(name.to_string()),
            other => CoreError::Bridge(other),
        })?;

        let handle = self.open_session(session_id);
        let mut task_ids = Vec::with_capacity(inputs.len());
        for raw in inputs {
            let track = match Track::new(raw.as_str(), requester.clone(), session_id.clone()) {
                Ok(track) => track,
                Err(err) => {
                    warn!(playlist = name, error = %err, "Skipping playlist entry");
                    continue;
                }
            };
            let priority = if task_ids.is_empty() {
                Priority::Normal
            } else {
                Priority::Low
            };
            task_ids.push(self.submit(track, priority, handle.clone()).await?);
        }

        info!(playlist = name, submitted = task_ids.len(), "Playlist enqueued");
        Ok(task_ids)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(CoreError::Processing(ProcessingError::ShutDown));
        }
        Ok(())
    }

    async fn submit(&self, track: Track, priority: Priority, handle: DriverHandle) -> Result<TaskId> {
        let scheduler = &self.inner.scheduler;
        let task_id = self
            .inner
            .submit_retry
            .execute("submit", |_| {
                let outcome =
                    scheduler.submit(track.clone(), priority, enqueue_when_ready(handle.clone()));
                async move { outcome }
            })
            .await?;
        Ok(task_id)
    }

    /// Cancel a single task. Returns whether it was still live.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.inner.scheduler.cancel(task_id)
    }

    /// Live or recently finished task.
    pub fn task(&self, task_id: TaskId) -> Option<ProcessingTask> {
        self.inner.scheduler.status(task_id)
    }

    // ------------------------------------------------------------------------
    // Cache, events and lifecycle
    // ------------------------------------------------------------------------

    /// Re-resolve expired popular entries ahead of demand. Returns the number
    /// of entries refreshed.
    pub async fn prewarm(&self) -> usize {
        let config = &self.inner.cache_config;
        self.inner
            .pipeline
            .prewarm(config.prewarm_limit, config.popular_min_access)
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            scheduler: self.inner.scheduler.stats(),
            cache: self.inner.pipeline.cache().stats(),
            sessions: self.inner.sessions.lock().len(),
        }
    }

    /// Close every session, stop the sweeper and drain the worker pool.
    pub async fn shutdown(&self) -> Result<()> {
        for session_id in self.session_ids() {
            self.close_session(&session_id).await?;
        }

        self.inner.shutdown.cancel();
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.await.ok();
        }

        self.inner
            .scheduler
            .shutdown(self.inner.playback.teardown_timeout)
            .await?;
        info!("Core service stopped");
        Ok(())
    }
}

/// Completion callback appending Ready tracks to the session's driver.
fn enqueue_when_ready(handle: DriverHandle) -> TaskCallback {
    Box::new(move |track: Track| {
        if !track.is_ready() {
            warn!(
                track_id = %track.id(),
                error = track.error().unwrap_or_default(),
                "Request could not be resolved"
            );
            return;
        }
        if let Err(err) = handle.enqueue_detached(track) {
            warn!(session_id = %handle.session_id(), error = %err, "Session closed before track was ready");
        }
    })
}
