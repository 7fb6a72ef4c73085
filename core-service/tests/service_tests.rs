use async_trait::async_trait;
use bridge_traits::{
    CompletionCallback, ExtractedMedia, ExtractionAdapter, ExtractionError, OutputBackend,
    OutputHandle, StaticPlaylistSource,
};
use core_processing::{Priority, ProcessingError};
use core_runtime::config::{CoreConfig, CoreConfigBuilder, RetryConfig, SchedulerConfig};
use core_service::{CoreError, CoreService};
use core_track::{RequesterId, SessionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SlowAdapter {
    calls: AtomicUsize,
    delay: Duration,
}

impl SlowAdapter {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl ExtractionAdapter for SlowAdapter {
    async fn extract(&self, target: &str) -> Result<ExtractedMedia, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let name = target.trim_start_matches("ytsearch1:");
        if name == "missing" {
            return Err(ExtractionError::terminal("Video unavailable"));
        }
        Ok(ExtractedMedia {
            title: name.to_string(),
            contributor: None,
            duration_secs: Some(200),
            thumbnail: None,
            stream_url: format!("https://cdn.example/{}", name),
            webpage_url: None,
        })
    }
}

struct SilentHandle;

impl OutputHandle for SilentHandle {
    fn stop(&self) {}

    fn pause(&self) -> bridge_traits::error::Result<()> {
        Ok(())
    }

    fn resume(&self) -> bridge_traits::error::Result<()> {
        Ok(())
    }
}

/// Never finishes a playback on its own.
#[derive(Default)]
struct RecordingBackend {
    opened: Mutex<Vec<String>>,
}

#[async_trait]
impl OutputBackend for RecordingBackend {
    async fn open(
        &self,
        locator: &str,
        _on_complete: CompletionCallback,
    ) -> bridge_traits::error::Result<Box<dyn OutputHandle>> {
        self.opened.lock().push(locator.to_string());
        Ok(Box::new(SilentHandle))
    }
}

fn builder(adapter: Arc<SlowAdapter>, backend: Arc<RecordingBackend>) -> CoreConfigBuilder {
    CoreConfig::builder()
        .extraction_adapter(adapter)
        .output_backend(backend)
        .playlist_source(Arc::new(
            StaticPlaylistSource::new().with_playlist("mix", ["x", "y", "z"]),
        ))
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(2)).await;
}

#[tokio::test(start_paused = true)]
async fn test_request_resolves_and_plays() {
    let adapter = SlowAdapter::new(Duration::from_millis(100));
    let backend = Arc::new(RecordingBackend::default());
    let core = CoreService::new(builder(adapter.clone(), backend.clone()).build().unwrap());
    let session = SessionId::new("guild");

    let task_id = core
        .request(&session, RequesterId::new("alice"), "never gonna", Priority::Normal)
        .await
        .unwrap();
    settle().await;

    assert_eq!(*backend.opened.lock(), vec!["https://cdn.example/never gonna"]);
    let task = core.task(task_id).unwrap();
    assert!(task.status.is_terminal());
    assert!(task.track.is_ready());

    let snapshot = core.session(&session).unwrap().snapshot().await.unwrap();
    assert_eq!(snapshot.queue_len, 1);

    core.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_requests_share_extraction() {
    let adapter = SlowAdapter::new(Duration::from_millis(300));
    let backend = Arc::new(RecordingBackend::default());
    let core = CoreService::new(builder(adapter.clone(), backend).build().unwrap());
    let session = SessionId::new("guild");

    for input in ["a", "b", "a"] {
        core.request(&session, RequesterId::new("bob"), input, Priority::Normal)
            .await
            .unwrap();
    }
    settle().await;

    assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    let snapshot = core.session(&session).unwrap().snapshot().await.unwrap();
    assert_eq!(snapshot.queue_len, 3);

    let stats = core.stats();
    assert_eq!(stats.scheduler.completed, 3);
    assert_eq!(stats.cache.misses, 2);
    assert_eq!(stats.sessions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_is_not_enqueued() {
    let adapter = SlowAdapter::new(Duration::from_millis(10));
    let backend = Arc::new(RecordingBackend::default());
    let core = CoreService::new(builder(adapter, backend.clone()).build().unwrap());
    let session = SessionId::new("guild");

    let task_id = core
        .request(&session, RequesterId::new("carol"), "missing", Priority::High)
        .await
        .unwrap();
    settle().await;

    assert!(core.task(task_id).unwrap().track.is_failed());
    assert!(backend.opened.lock().is_empty());
    let snapshot = core.session(&session).unwrap().snapshot().await.unwrap();
    assert_eq!(snapshot.queue_len, 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_request_is_rejected() {
    let core = CoreService::new(
        builder(SlowAdapter::new(Duration::ZERO), Arc::new(RecordingBackend::default()))
            .build()
            .unwrap(),
    );

    let err = core
        .request(&SessionId::new("guild"), RequesterId::new("dave"), "   ", Priority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Track(_)));
}

#[tokio::test(start_paused = true)]
async fn test_playlist_first_item_normal_rest_low() {
    let core = CoreService::new(
        builder(SlowAdapter::new(Duration::from_secs(1)), Arc::new(RecordingBackend::default()))
            .scheduler(SchedulerConfig::default().with_workers(1))
            .build()
            .unwrap(),
    );
    let session = SessionId::new("guild");

    let ids = core
        .enqueue_playlist(&session, RequesterId::new("erin"), "mix")
        .await
        .unwrap();

    let priorities: Vec<Priority> = ids
        .iter()
        .map(|id| core.task(*id).unwrap().priority)
        .collect();
    assert_eq!(priorities, vec![Priority::Normal, Priority::Low, Priority::Low]);
}

#[tokio::test(start_paused = true)]
async fn test_playlist_errors() {
    let session = SessionId::new("guild");
    let core = CoreService::new(
        builder(SlowAdapter::new(Duration::ZERO), Arc::new(RecordingBackend::default()))
            .build()
            .unwrap(),
    );
    let err = core
        .enqueue_playlist(&session, RequesterId::new("frank"), "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PlaylistNotFound(name) if name == "nope"));

    let without_source = CoreService::new(
        CoreConfig::builder()
            .extraction_adapter(SlowAdapter::new(Duration::ZERO))
            .output_backend(Arc::new(RecordingBackend::default()))
            .build()
            .unwrap(),
    );
    let err = without_source
        .enqueue_playlist(&session, RequesterId::new("frank"), "mix")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CapabilityMissing { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_queue_full_surfaces_after_retries() {
    let core = CoreService::new(
        builder(SlowAdapter::new(Duration::from_secs(5)), Arc::new(RecordingBackend::default()))
            .scheduler(SchedulerConfig::default().with_workers(1).with_queue_capacity(1))
            .retry(RetryConfig::default().with_max_attempts(1))
            .build()
            .unwrap(),
    );
    let session = SessionId::new("guild");

    core.request(&session, RequesterId::new("gina"), "first", Priority::Normal)
        .await
        .unwrap();
    let err = core
        .request(&session, RequesterId::new("gina"), "second", Priority::Normal)
        .await
        .unwrap_err();

    assert!(err.is_queue_full());
    assert!(matches!(
        err,
        CoreError::Processing(ProcessingError::QueueFull { capacity: 1 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_close_session_cancels_outstanding_work() {
    let adapter = SlowAdapter::new(Duration::from_secs(3));
    let core = CoreService::new(
        builder(adapter, Arc::new(RecordingBackend::default()))
            .scheduler(SchedulerConfig::default().with_workers(1))
            .build()
            .unwrap(),
    );
    let session = SessionId::new("guild");
    let mut ids = Vec::new();
    for input in ["a", "b", "c"] {
        ids.push(
            core.request(&session, RequesterId::new("hank"), input, Priority::Normal)
                .await
                .unwrap(),
        );
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(core.close_session(&session).await.unwrap());

    assert!(core.session(&session).is_none());
    assert_eq!(core.stats().scheduler.queued, 0);
    assert_eq!(core.stats().scheduler.processing, 0);
    assert!(core.close_session(&session).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_refuses_new_requests() {
    let core = CoreService::new(
        builder(SlowAdapter::new(Duration::ZERO), Arc::new(RecordingBackend::default()))
            .build()
            .unwrap(),
    );
    let session = SessionId::new("guild");
    core.open_session(&session);

    core.shutdown().await.unwrap();

    assert!(core.session_ids().is_empty());
    let err = core
        .request(&session, RequesterId::new("ivy"), "late", Priority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Processing(ProcessingError::ShutDown)));
}
