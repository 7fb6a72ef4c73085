//! # Worker Pool / Scheduler
//!
//! A bounded priority queue of [`ProcessingTask`]s consumed by a fixed pool of
//! `tokio` workers.
//!
//! ```text
//!  submit(track, priority, callback)
//!         │
//!         ▼
//! ┌──────────────────┐  claim   ┌──────────┐  resolve  ┌────────────────┐
//! │ BinaryHeap       │ ───────> │ worker N │ ────────> │ MediaResolver  │
//! │ (priority, seq)  │          └────┬─────┘           │ cache/breaker/ │
//! └──────────────────┘               │                 │ retry/adapter  │
//!         ▲                          │                 └────────────────┘
//!         │   transient failure,     ├──> Track::mark_ready / mark_failed
//!         └── retry budget left ─────┤
//!             (after backoff)        └──> callback(track), events
//! ```
//!
//! ## Guarantees
//!
//! - Higher priority first; FIFO within one priority (submission sequence).
//! - A track has at most one live task.
//! - Workers never die on a task failure. Every resolution error ends as a
//!   Failed track handed to the callback. A panicking resolver counts as a
//!   terminal error and a panicking callback is caught.
//! - Cancelled tasks never reach their callback. A cancelled in-flight task
//!   finishes its extraction, but the result is discarded.
//! - Transient failures are re-enqueued after
//!   `min(unit * 2^retry_count, cap)` while `retry_count < max_retries`.
//!   Terminal errors and open circuits fail immediately.

use crate::error::{PipelineError, ProcessingError, Result};
use crate::pipeline::{MediaResolver, ResolvedMedia};
use crate::task::{progress, Priority, ProcessingTask, QueueEntry, TaskCallback, TaskId, TaskStatus};
use async_trait::async_trait;
use core_resilience::Transient;
use core_runtime::config::SchedulerConfig;
use core_runtime::events::{CoreEvent, EventBus, TaskEvent, TrackEvent};
use core_track::{SessionId, SourceKind, Track, TrackId, TrackMetadata};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Waits for a track to leave the scheduler.
#[async_trait]
pub trait TrackWaiter: Send + Sync {
    /// Resolve once the task wrapping `track_id` has finished, returning the
    /// terminal track.
    async fn wait_for_track(&self, track_id: TrackId, timeout: Duration) -> Result<Track>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub capacity: usize,
    pub workers: usize,
}

struct TaskEntry {
    task: ProcessingTask,
    callback: Option<TaskCallback>,
}

#[derive(Default)]
struct Counters {
    completed: u64,
    failed: u64,
    cancelled: u64,
    retried: u64,
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<QueueEntry>,
    live: HashMap<TaskId, TaskEntry>,
    by_track: HashMap<TrackId, TaskId>,
    archive: VecDeque<ProcessingTask>,
    next_seq: u64,
    counters: Counters,
    shut_down: bool,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn queued_len(&self) -> usize {
        self.live
            .values()
            .filter(|entry| entry.task.status == TaskStatus::Queued)
            .count()
    }

    fn retire(&mut self, task: ProcessingTask, limit: usize) {
        self.by_track.remove(&task.track.id());
        self.archive.push_back(task);
        while self.archive.len() > limit {
            self.archive.pop_front();
        }
    }
}

/// What a worker needs to run one task. The track itself stays in the live
/// table.
struct Claim {
    task_id: TaskId,
    track_id: TrackId,
    kind: SourceKind,
    input: String,
}

struct Inner {
    config: SchedulerConfig,
    resolver: Arc<dyn MediaResolver>,
    event_bus: EventBus,
    state: Mutex<State>,
    work_ready: Notify,
    task_finished: Notify,
    cancel: CancellationToken,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create an idle scheduler. No worker runs until [`Scheduler::start`].
    ///
    /// # Arguments
    ///
    /// * `config` - Queue bound, worker count and retry policy
    /// * `resolver` - Turns task inputs into playable media
    /// * `event_bus` - Receives task and track lifecycle events
    pub fn new(
        config: SchedulerConfig,
        resolver: Arc<dyn MediaResolver>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                event_bus,
                state: Mutex::new(State::default()),
                work_ready: Notify::new(),
                task_finished: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The configuration the scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Spawn the worker pool. Must be called from within a tokio runtime.
    /// Calling it again while workers are running does nothing.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() || self.inner.cancel.is_cancelled() {
            return;
        }

        for worker_id in 0..self.inner.config.workers {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(run_worker(inner, worker_id)));
        }
        info!(workers = self.inner.config.workers, "Scheduler started");
    }

    /// Queue `track` for resolution.
    ///
    /// `callback` receives the terminal (Ready or Failed) track.
    #[instrument(skip(self, track, priority, callback), fields(track_id = %track.id(), priority = %priority))]
    pub fn submit(&self, track: Track, priority: Priority, callback: TaskCallback) -> Result<TaskId> {
        if track.status().is_terminal() {
            return Err(ProcessingError::InvalidTrack {
                track_id: track.id().to_string(),
                status: track.status(),
            });
        }

        let task = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return Err(ProcessingError::ShutDown);
            }
            if state.by_track.contains_key(&track.id()) {
                return Err(ProcessingError::AlreadyQueued(track.id().to_string()));
            }
            let capacity = self.inner.config.queue_capacity;
            if state.queued_len() >= capacity {
                warn!(capacity, "Processing queue full");
                return Err(ProcessingError::QueueFull { capacity });
            }

            let seq = state.next_seq();
            let task = ProcessingTask::new(track, priority, self.inner.config.max_retries, seq);
            state.heap.push(QueueEntry {
                priority,
                seq,
                task_id: task.id,
            });
            state.by_track.insert(task.track.id(), task.id);
            let snapshot = task.clone();
            state.live.insert(
                task.id,
                TaskEntry {
                    task,
                    callback: Some(callback),
                },
            );
            snapshot
        };

        debug!(task_id = %task.id, seq = task.seq, "Task queued");
        self.inner.emit(TaskEvent::Queued {
            task_id: task.id.to_string(),
            track_id: task.track.id().to_string(),
            priority: priority.to_string(),
        });
        self.inner.work_ready.notify_one();

        Ok(task.id)
    }

    /// Cancel a queued or in-flight task. Returns `false` for unknown or
    /// already finished tasks.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.inner.cancel_task(task_id)
    }

    /// Cancel every live task of `session_id`.
    pub fn cancel_session(&self, session_id: &SessionId) -> usize {
        let ids: Vec<TaskId> = {
            let state = self.inner.state.lock();
            state
                .live
                .values()
                .filter(|entry| entry.task.track.session_id() == session_id)
                .map(|entry| entry.task.id)
                .collect()
        };

        let cancelled = ids
            .into_iter()
            .filter(|id| self.inner.cancel_task(*id))
            .count();
        if cancelled > 0 {
            info!(session_id = %session_id, cancelled, "Cancelled session tasks");
        }
        cancelled
    }

    /// Wait until no task of `session_id` is live, including cancelled tasks
    /// whose extraction is still running. Returns `false` on timeout.
    pub async fn await_session_idle(&self, session_id: &SessionId, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.task_finished.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if !self.inner.has_live_tasks(session_id) {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Live or archived snapshot of a task.
    pub fn status(&self, task_id: TaskId) -> Option<ProcessingTask> {
        let state = self.inner.state.lock();
        if let Some(entry) = state.live.get(&task_id) {
            return Some(entry.task.clone());
        }
        state.archive.iter().rev().find(|t| t.id == task_id).cloned()
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        let processing = state
            .live
            .values()
            .filter(|entry| entry.task.status == TaskStatus::Processing)
            .count();

        SchedulerStats {
            queued: state.queued_len(),
            processing,
            completed: state.counters.completed,
            failed: state.counters.failed,
            cancelled: state.counters.cancelled,
            retried: state.counters.retried,
            capacity: self.inner.config.queue_capacity,
            workers: self.workers.lock().len(),
        }
    }

    /// Cancel outstanding work and stop the workers.
    ///
    /// In-flight extractions are abandoned. Fails if the workers have not
    /// stopped within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let ids: Vec<TaskId> = {
            let mut state = self.inner.state.lock();
            state.shut_down = true;
            state.live.keys().copied().collect()
        };
        for id in ids {
            self.inner.cancel_task(id);
        }

        self.inner.cancel.cancel();
        let handles = std::mem::take(&mut *self.workers.lock());
        let count = handles.len();

        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => {
                info!(workers = count, "Scheduler stopped");
                Ok(())
            }
            Err(_) => {
                error!(workers = count, ?timeout, "Scheduler workers did not stop in time");
                Err(ProcessingError::ShutdownTimeout(timeout))
            }
        }
    }
}

#[async_trait]
impl TrackWaiter for Scheduler {
    async fn wait_for_track(&self, track_id: TrackId, timeout: Duration) -> Result<Track> {
        let wait = async {
            loop {
                let notified = self.inner.task_finished.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(outcome) = self.inner.track_outcome(track_id) {
                    return outcome;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ProcessingError::WaitTimeout(timeout))?
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn run_worker(inner: Arc<Inner>, worker_id: usize) {
    debug!(worker_id, "Worker started");

    loop {
        let claim = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            claim = inner.next_claim() => claim,
        };
        inner.process(claim).await;
    }

    debug!(worker_id, "Worker stopped");
}

impl Inner {
    fn emit(&self, event: TaskEvent) {
        self.event_bus.emit(CoreEvent::Task(event)).ok();
    }

    fn emit_track(&self, event: TrackEvent) {
        self.event_bus.emit(CoreEvent::Track(event)).ok();
    }

    async fn next_claim(&self) -> Claim {
        loop {
            if let Some(claim) = self.claim() {
                return claim;
            }
            self.work_ready.notified().await;
        }
    }

    /// Pop the best queued task and mark it Processing. Heap entries of
    /// cancelled or re-sequenced tasks are discarded.
    fn claim(&self) -> Option<Claim> {
        let mut state = self.state.lock();

        while let Some(next) = state.heap.pop() {
            let Some(entry) = state.live.get_mut(&next.task_id) else {
                continue;
            };
            if entry.task.status != TaskStatus::Queued || entry.task.seq != next.seq {
                continue;
            }

            if let Err(err) = entry.task.track.mark_processing() {
                error!(task_id = %next.task_id, error = %err, "Queued track cannot be claimed");
                if let Some(mut entry) = state.live.remove(&next.task_id) {
                    entry.task.status = TaskStatus::Failed;
                    entry.task.last_error = Some(err.to_string());
                    state.counters.failed += 1;
                    state.retire(entry.task, self.config.archive_size);
                }
                continue;
            }
            entry.task.status = TaskStatus::Processing;

            let claim = Claim {
                task_id: next.task_id,
                track_id: entry.task.track.id(),
                kind: entry.task.track.source_kind(),
                input: entry.task.track.raw_input().to_string(),
            };

            let more = !state.heap.is_empty();
            drop(state);
            if more {
                self.work_ready.notify_one();
            }
            return Some(claim);
        }

        None
    }

    fn report_progress(&self, task_id: TaskId, percent: u8) {
        let advanced = {
            let mut state = self.state.lock();
            state
                .live
                .get_mut(&task_id)
                .map(|entry| entry.task.advance_progress(percent))
                .unwrap_or(false)
        };
        if advanced {
            self.emit(TaskEvent::Progress {
                task_id: task_id.to_string(),
                percent,
            });
        }
    }

    #[instrument(skip(self, claim), fields(task_id = %claim.task_id, track_id = %claim.track_id, kind = %claim.kind))]
    async fn process(self: &Arc<Self>, claim: Claim) {
        self.report_progress(claim.task_id, progress::CLAIMED);
        self.report_progress(claim.task_id, progress::RESOLVING);

        let resolution = AssertUnwindSafe(self.resolver.resolve(claim.kind, &claim.input));
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.abandon(claim.task_id);
                return;
            }
            outcome = resolution.catch_unwind() => {
                outcome.unwrap_or_else(|_| {
                    error!("Resolver panicked");
                    Err(PipelineError::Terminal("resolver panicked".to_string()))
                })
            }
        };

        match outcome {
            Ok((resolved, was_cached)) => self.complete(claim, resolved, was_cached),
            Err(err) => self.fail_or_retry(claim, err),
        }
    }

    /// Drop a cancelled task whose worker has let go of it.
    fn acknowledge_cancelled(&self, mut state: parking_lot::MutexGuard<'_, State>, task_id: TaskId) {
        if let Some(entry) = state.live.remove(&task_id) {
            state.counters.cancelled += 1;
            state.retire(entry.task, self.config.archive_size);
        }
        drop(state);
        debug!(task_id = %task_id, "Discarded result of cancelled task");
        self.task_finished.notify_waiters();
    }

    fn abandon(&self, task_id: TaskId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.live.get_mut(&task_id) {
            entry.task.status = TaskStatus::Cancelled;
            entry.callback = None;
        }
        self.acknowledge_cancelled(state, task_id);
    }

    fn complete(self: &Arc<Self>, claim: Claim, resolved: ResolvedMedia, was_cached: bool) {
        let mut state = self.state.lock();
        let cancelled = match state.live.get(&claim.task_id) {
            None => return,
            Some(entry) => entry.task.status == TaskStatus::Cancelled,
        };
        if cancelled {
            self.acknowledge_cancelled(state, claim.task_id);
            return;
        }

        let Some(mut entry) = state.live.remove(&claim.task_id) else {
            return;
        };
        let metadata = TrackMetadata::from(&resolved.media);
        if let Err(err) = entry
            .task
            .track
            .mark_ready(metadata, resolved.media.stream_url, resolved.issued_at)
        {
            // Put the entry back so the failure path can retire it.
            state.live.insert(claim.task_id, entry);
            drop(state);
            self.fail_or_retry(claim, PipelineError::Terminal(err.to_string()));
            return;
        }

        entry.task.advance_progress(progress::RESOLVED);
        entry.task.advance_progress(progress::DONE);
        entry.task.status = TaskStatus::Completed;
        state.counters.completed += 1;

        let track = entry.task.track.clone();
        let callback = entry.callback.take();
        state.retire(entry.task, self.config.archive_size);
        drop(state);

        info!(title = %track.display_title(), was_cached, "Track ready");
        for percent in [progress::RESOLVED, progress::DONE] {
            self.emit(TaskEvent::Progress {
                task_id: claim.task_id.to_string(),
                percent,
            });
        }
        self.emit_track(TrackEvent::Ready {
            track_id: track.id().to_string(),
            session_id: track.session_id().to_string(),
            title: track.display_title().to_string(),
            was_cached,
        });
        self.event_bus
            .emit(track.updated_event(&["metadata", "stream_url"]))
            .ok();
        self.emit(TaskEvent::Completed {
            task_id: claim.task_id.to_string(),
            track_id: track.id().to_string(),
        });
        self.task_finished.notify_waiters();

        invoke(callback, track);
    }

    fn fail_or_retry(self: &Arc<Self>, claim: Claim, err: PipelineError) {
        let mut state = self.state.lock();
        let Some(entry) = state.live.get(&claim.task_id) else {
            return;
        };
        if entry.task.status == TaskStatus::Cancelled {
            self.acknowledge_cancelled(state, claim.task_id);
            return;
        }

        if err.is_transient() && entry.task.can_retry() {
            let retry_count = entry.task.retry_count;
            let delay = self.config.retry_delay(retry_count);
            let seq = state.next_seq();
            state.counters.retried += 1;
            if let Some(entry) = state.live.get_mut(&claim.task_id) {
                entry.task.requeue(seq, err.to_string());
            }
            drop(state);

            warn!(
                attempt = retry_count + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Task failed, re-enqueueing"
            );
            self.emit(TaskEvent::Retrying {
                task_id: claim.task_id.to_string(),
                attempt: retry_count + 1,
                delay_ms: delay.as_millis() as u64,
                message: err.to_string(),
            });

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                tokio::select! {
                    _ = inner.cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => inner.requeue(claim.task_id, seq),
                }
            });
            return;
        }

        let Some(mut entry) = state.live.remove(&claim.task_id) else {
            return;
        };
        let message = err.to_string();
        if let Err(track_err) = entry.task.track.mark_failed(message.clone()) {
            error!(error = %track_err, "Could not mark track failed");
        }
        entry.task.status = TaskStatus::Failed;
        entry.task.last_error = Some(message.clone());
        state.counters.failed += 1;

        let retries = entry.task.retry_count;
        let track = entry.task.track.clone();
        let callback = entry.callback.take();
        state.retire(entry.task, self.config.archive_size);
        drop(state);

        warn!(retries, circuit_open = err.is_circuit_open(), error = %err, "Task failed");
        self.emit(TaskEvent::Failed {
            task_id: claim.task_id.to_string(),
            track_id: track.id().to_string(),
            message: message.clone(),
        });
        self.emit_track(TrackEvent::Failed {
            track_id: track.id().to_string(),
            session_id: track.session_id().to_string(),
            input: track.raw_input().to_string(),
            message,
            circuit_open: err.is_circuit_open(),
        });
        self.task_finished.notify_waiters();

        invoke(callback, track);
    }

    /// Push a task back on the heap after its backoff, unless it was
    /// cancelled meanwhile.
    fn requeue(&self, task_id: TaskId, seq: u64) {
        {
            let mut state = self.state.lock();
            let Some(entry) = state.live.get(&task_id) else {
                return;
            };
            if entry.task.status != TaskStatus::Queued || entry.task.seq != seq {
                return;
            }
            let priority = entry.task.priority;
            state.heap.push(QueueEntry {
                priority,
                seq,
                task_id,
            });
        }
        self.work_ready.notify_one();
    }

    fn cancel_task(&self, task_id: TaskId) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.live.get_mut(&task_id) else {
            return false;
        };

        match entry.task.status {
            TaskStatus::Queued => {
                entry.callback = None;
                if let Some(mut entry) = state.live.remove(&task_id) {
                    entry.task.status = TaskStatus::Cancelled;
                    state.counters.cancelled += 1;
                    state.retire(entry.task, self.config.archive_size);
                }
                drop(state);
                self.task_finished.notify_waiters();
            }
            TaskStatus::Processing => {
                // The worker retires it once the extraction returns.
                entry.task.status = TaskStatus::Cancelled;
                entry.callback = None;
                drop(state);
            }
            _ => return false,
        }

        debug!(task_id = %task_id, "Task cancelled");
        self.emit(TaskEvent::Cancelled {
            task_id: task_id.to_string(),
        });
        true
    }

    fn has_live_tasks(&self, session_id: &SessionId) -> bool {
        self.state
            .lock()
            .live
            .values()
            .any(|entry| entry.task.track.session_id() == session_id)
    }

    /// `None` while the track is still live.
    fn track_outcome(&self, track_id: TrackId) -> Option<Result<Track>> {
        let state = self.state.lock();
        if state.by_track.contains_key(&track_id) {
            return None;
        }

        let outcome = match state.archive.iter().rev().find(|t| t.track.id() == track_id) {
            Some(task) if task.status == TaskStatus::Cancelled => {
                Err(ProcessingError::Cancelled(track_id.to_string()))
            }
            Some(task) => Ok(task.track.clone()),
            None => Err(ProcessingError::UnknownTrack(track_id.to_string())),
        };
        Some(outcome)
    }
}

fn invoke(callback: Option<TaskCallback>, track: Track) {
    let Some(callback) = callback else {
        return;
    };
    let track_id = track.id();
    if std::panic::catch_unwind(AssertUnwindSafe(move || callback(track))).is_err() {
        error!(track_id = %track_id, "Task callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ExtractedMedia;
    use chrono::Utc;
    use core_track::RequesterId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves after a fixed delay, counting calls.
    struct SlowResolver {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaResolver for SlowResolver {
        async fn resolve(
            &self,
            _kind: SourceKind,
            raw: &str,
        ) -> std::result::Result<(ResolvedMedia, bool), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let media = ExtractedMedia {
                title: raw.to_string(),
                contributor: None,
                duration_secs: None,
                thumbnail: None,
                stream_url: format!("https://cdn.example/{}", raw),
                webpage_url: None,
            };
            Ok((ResolvedMedia::new(raw, SourceKind::Search, media, Utc::now()), false))
        }

        async fn refresh(
            &self,
            kind: SourceKind,
            raw: &str,
        ) -> std::result::Result<ExtractedMedia, PipelineError> {
            self.resolve(kind, raw).await.map(|(resolved, _)| resolved.media)
        }
    }

    fn scheduler(config: SchedulerConfig) -> (Scheduler, Arc<SlowResolver>) {
        let resolver = Arc::new(SlowResolver {
            delay: Duration::from_secs(1),
            calls: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(config, resolver.clone(), EventBus::new(64));
        (scheduler, resolver)
    }

    fn track(input: &str, session: &str) -> Track {
        Track::new(input, RequesterId::new("u"), SessionId::new(session)).unwrap()
    }

    fn noop() -> TaskCallback {
        Box::new(|_| {})
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicates_and_overflow() {
        let (scheduler, _) = scheduler(SchedulerConfig::default().with_queue_capacity(2));

        let first = track("a", "s");
        scheduler.submit(first.clone(), Priority::Normal, noop()).unwrap();
        assert!(matches!(
            scheduler.submit(first, Priority::High, noop()),
            Err(ProcessingError::AlreadyQueued(_))
        ));

        scheduler.submit(track("b", "s"), Priority::Normal, noop()).unwrap();
        let err = scheduler
            .submit(track("c", "s"), Priority::Normal, noop())
            .unwrap_err();
        assert!(err.is_queue_full());
        assert_eq!(scheduler.stats().queued, 2);
    }

    #[tokio::test]
    async fn test_submit_rejects_terminal_track() {
        let (scheduler, _) = scheduler(SchedulerConfig::default());
        let mut failed = track("a", "s");
        failed.mark_failed("Video unavailable").unwrap();

        assert!(matches!(
            scheduler.submit(failed, Priority::Normal, noop()),
            Err(ProcessingError::InvalidTrack { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        let (scheduler, resolver) = scheduler(SchedulerConfig::default().with_workers(1));
        let called = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&called);

        let id = scheduler
            .submit(
                track("a", "s"),
                Priority::Normal,
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert_eq!(scheduler.status(id).unwrap().status, TaskStatus::Cancelled);

        scheduler.start();
        tokio::task::yield_now().await;
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_discards_result() {
        let (scheduler, resolver) = scheduler(SchedulerConfig::default().with_workers(1));
        let called = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&called);
        scheduler.start();

        let t = track("a", "room");
        let track_id = t.id();
        let id = scheduler
            .submit(
                t,
                Priority::Normal,
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        while resolver.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.status(id).unwrap().status, TaskStatus::Processing);

        assert_eq!(scheduler.cancel_session(&SessionId::new("room")), 1);
        assert!(
            scheduler
                .await_session_idle(&SessionId::new("room"), Duration::from_secs(5))
                .await
        );

        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert!(matches!(
            scheduler.wait_for_track(track_id, Duration::from_secs(1)).await,
            Err(ProcessingError::Cancelled(_))
        ));
        assert_eq!(scheduler.stats().cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_track_returns_ready_track() {
        let (scheduler, _) = scheduler(SchedulerConfig::default());
        scheduler.start();

        let t = track("song", "s");
        let track_id = t.id();
        scheduler.submit(t, Priority::High, noop()).unwrap();

        let ready = scheduler
            .wait_for_track(track_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(ready.is_ready());
        assert_eq!(ready.stream_url(), Some("https://cdn.example/song"));

        assert!(matches!(
            scheduler.wait_for_track(TrackId::new(), Duration::from_secs(1)).await,
            Err(ProcessingError::UnknownTrack(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let (scheduler, _) = scheduler(SchedulerConfig::default());
        scheduler.start();
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(matches!(
            scheduler.submit(track("a", "s"), Priority::Normal, noop()),
            Err(ProcessingError::ShutDown)
        ));
    }
}
