//! # Playback Driver
//!
//! One driver per session owns the session's output connection and
//! [`Tracklist`]. It runs as a single `tokio` task consuming a command
//! channel, so every state change happens in one logical sequence no matter
//! which thread asked for it.
//!
//! ```text
//!   DriverHandle ──┐
//!   DriverHandle ──┼──> mpsc::UnboundedSender<Command> ──> driver task
//!   backend thread ┘         (Completion { generation })      │
//!                                                             ├─ Tracklist
//!                                                             ├─ OutputHandle
//!                                                             └─ watch<Snapshot>
//! ```
//!
//! ## Exactly one advance per ended playback
//!
//! Backends report the end of every playback, including the ones the driver
//! stopped itself. Each `open` gets a new generation number and the
//! completion callback carries it back.
//!
//! - `stop(suppress = true)` (and `skip`) arm the suppress flag for the
//!   current generation before stopping the handle; the flag is released
//!   after `suppress_grace`. Completions for a suppressed generation are
//!   dropped, so the caller alone decides what plays next.
//! - Completions for anything but the latest generation, or for a generation
//!   already settled, are dropped as stale.
//! - A remaining completion advances the Tracklist. A stream error first
//!   gets one forced locator refresh and a replay of the same track.

use crate::error::{PlaybackError, Result};
use crate::refresh::StreamRefresher;
use bridge_traits::{CompletionCallback, OutputBackend, OutputHandle, PlaybackEnd};
use core_processing::TrackWaiter;
use core_runtime::config::PlaybackConfig;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_runtime::logging::redact_locator;
use core_track::{RepeatMode, SessionId, Track, TrackId, Tracklist};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerState {
    #[default]
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlayerState::Idle => "idle",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Point-in-time view of a driver, published after every command.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub session_id: SessionId,
    pub state: PlayerState,
    pub current: Option<Track>,
    pub position: Option<usize>,
    pub queue_len: usize,
    pub repeat_mode: RepeatMode,
    pub generation: u64,
    /// Whether auto-advance is currently suppressed
    pub suppressing: bool,
}

impl PlaybackSnapshot {
    fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: PlayerState::Idle,
            current: None,
            position: None,
            queue_len: 0,
            repeat_mode: RepeatMode::Off,
            generation: 0,
            suppressing: false,
        }
    }
}

enum Command {
    Play {
        track: Track,
        reply: oneshot::Sender<bool>,
    },
    Enqueue {
        track: Track,
        reply: oneshot::Sender<usize>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Stop {
        suppress: bool,
        reply: oneshot::Sender<bool>,
    },
    Skip {
        reply: oneshot::Sender<bool>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    SetRepeatMode {
        mode: RepeatMode,
        reply: oneshot::Sender<bool>,
    },
    Upcoming {
        limit: usize,
        reply: oneshot::Sender<Vec<Track>>,
    },
    Remove {
        position: usize,
        reply: oneshot::Sender<Result<Track>>,
    },
    Shuffle {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<PlaybackSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    /// Raised by the backend's completion callback.
    Completion { generation: u64, end: PlaybackEnd },
    /// Raised when the suppress grace period of `generation` has elapsed.
    ReleaseSuppress { generation: u64 },
}

/// Collaborators a driver needs.
#[derive(Clone)]
pub struct DriverContext {
    pub config: PlaybackConfig,
    pub backend: Arc<dyn OutputBackend>,
    pub refresher: Arc<StreamRefresher>,
    pub waiter: Arc<dyn TrackWaiter>,
    pub event_bus: EventBus,
}

pub struct PlaybackDriver {
    session_id: SessionId,
    ctx: DriverContext,
    tracklist: Tracklist,
    state: PlayerState,
    output: Option<Box<dyn OutputHandle>>,
    current: Option<Track>,
    /// Incremented on every successful `open`
    generation: u64,
    /// Highest generation whose end has been dealt with
    settled: u64,
    suppressed: Option<u64>,
    /// Track already replayed once after a stream error
    replayed: Option<TrackId>,
    commands: mpsc::WeakUnboundedSender<Command>,
    snapshot: watch::Sender<PlaybackSnapshot>,
}

impl PlaybackDriver {
    /// Start the driver task for `session_id`. Must be called from within a
    /// tokio runtime.
    pub fn spawn(session_id: SessionId, ctx: DriverContext) -> DriverHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PlaybackSnapshot::empty(session_id.clone()));

        let driver = PlaybackDriver {
            session_id: session_id.clone(),
            ctx,
            tracklist: Tracklist::new(),
            state: PlayerState::Idle,
            output: None,
            current: None,
            generation: 0,
            settled: 0,
            suppressed: None,
            replayed: None,
            commands: tx.downgrade(),
            snapshot: snapshot_tx,
        };
        tokio::spawn(driver.run(rx));

        DriverHandle {
            session_id,
            tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(session_id = %self.session_id, "Playback driver started");

        while let Some(command) = rx.recv().await {
            let keep_running = self.handle(command).await;
            self.publish();
            if !keep_running {
                break;
            }
        }

        self.stop_output(true);
        self.publish();
        info!(session_id = %self.session_id, "Playback driver stopped");
    }

    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Play { track, reply } => {
                let started = self.play_now(track).await;
                reply.send(started).ok();
            }
            Command::Enqueue { track, reply } => {
                let position = self.tracklist.add(track);
                if self.state == PlayerState::Idle && self.output.is_none() {
                    self.play_from_current().await;
                }
                reply.send(position).ok();
            }
            Command::Pause { reply } => {
                reply.send(self.pause()).ok();
            }
            Command::Resume { reply } => {
                reply.send(self.resume()).ok();
            }
            Command::Stop { suppress, reply } => {
                let stopped = self.stop_output(suppress);
                // A suppressed stop does its own cleanup: nothing is left to resume.
                if suppress {
                    self.tracklist.clear();
                }
                reply.send(stopped).ok();
            }
            Command::Skip { reply } => {
                let started = self.skip().await;
                reply.send(started).ok();
            }
            Command::Clear { reply } => {
                self.stop_output(true);
                self.tracklist.clear();
                debug!(session_id = %self.session_id, "Tracklist cleared");
                reply.send(()).ok();
            }
            Command::SetRepeatMode { mode, reply } => {
                let changed = self.tracklist.set_repeat_mode(mode);
                if changed {
                    info!(session_id = %self.session_id, mode = %mode, "Repeat mode changed");
                }
                reply.send(changed).ok();
            }
            Command::Upcoming { limit, reply } => {
                reply.send(self.tracklist.get_upcoming(limit)).ok();
            }
            Command::Remove { position, reply } => {
                reply.send(self.tracklist.remove(position).map_err(PlaybackError::from)).ok();
            }
            Command::Shuffle { reply } => {
                self.tracklist.shuffle_upcoming();
                reply.send(()).ok();
            }
            Command::Snapshot { reply } => {
                reply.send(self.snapshot()).ok();
            }
            Command::Shutdown { reply } => {
                self.stop_output(true);
                self.tracklist.clear();
                reply.send(()).ok();
                return false;
            }
            Command::Completion { generation, end } => {
                self.on_completion(generation, end).await;
            }
            Command::ReleaseSuppress { generation } => {
                if self.suppressed == Some(generation) {
                    self.suppressed = None;
                    debug!(session_id = %self.session_id, generation, "Auto-advance re-enabled");
                }
            }
        }
        true
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            session_id: self.session_id.clone(),
            state: self.state,
            current: self.current.clone(),
            position: self.tracklist.position(),
            queue_len: self.tracklist.len(),
            repeat_mode: self.tracklist.repeat_mode(),
            generation: self.generation,
            suppressing: self.suppressed.is_some(),
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.snapshot());
    }

    fn emit(&self, event: PlaybackEvent) {
        self.ctx.event_bus.emit(CoreEvent::Playback(event)).ok();
    }

    fn current_track_id(&self) -> String {
        self.current
            .as_ref()
            .map(|t| t.id().to_string())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Output control
    // ------------------------------------------------------------------------

    /// Open `track` on the backend. Waits for processing tracks and refreshes
    /// stale locators first. Returns whether playback started.
    #[instrument(skip(self, track), fields(session_id = %self.session_id, track_id = %track.id()))]
    async fn start(&mut self, track: Track) -> bool {
        if self.replayed.is_some_and(|id| id != track.id()) {
            self.replayed = None;
        }

        match self.prepare(track).await {
            Ok(track) => self.open(track).await,
            Err((track_id, err)) => {
                warn!(error = %err, "Track cannot be played");
                self.emit(PlaybackEvent::Error {
                    session_id: self.session_id.to_string(),
                    track_id: Some(track_id.to_string()),
                    message: err.to_string(),
                    recoverable: err.is_transient(),
                });
                false
            }
        }
    }

    async fn prepare(
        &mut self,
        mut track: Track,
    ) -> std::result::Result<Track, (TrackId, PlaybackError)> {
        let track_id = track.id();

        if !track.status().is_terminal() {
            debug!("Waiting for track to finish processing");
            track = self
                .ctx
                .waiter
                .wait_for_track(track_id, self.ctx.config.ready_wait_timeout)
                .await
                .map_err(|e| (track_id, PlaybackError::from(e)))?;
            self.tracklist.update(track.clone());
        }

        if track.is_failed() {
            return Err((
                track_id,
                PlaybackError::TrackFailed {
                    track_id: track_id.to_string(),
                    message: track.error().unwrap_or_default().to_string(),
                },
            ));
        }

        match self.ctx.refresher.ensure_fresh(&mut track).await {
            Ok(true) => {
                self.tracklist.update(track.clone());
            }
            Ok(false) => {}
            // The old locator may still play; a failure shows up as a stream error.
            Err(err) => warn!(error = %err, "Locator refresh failed, using existing locator"),
        }

        Ok(track)
    }

    async fn open(&mut self, track: Track) -> bool {
        let Some(locator) = track.stream_url().map(str::to_string) else {
            let err = PlaybackError::MissingLocator(track.id().to_string());
            error!(error = %err, "Ready track without locator");
            return false;
        };

        let generation = self.generation + 1;
        let callback = self.completion_callback(generation);
        debug!(locator = %redact_locator(&locator), generation, "Opening stream");

        match self.ctx.backend.open(&locator, callback).await {
            Ok(output) => {
                self.generation = generation;
                self.output = Some(output);
                self.state = PlayerState::Playing;
                info!(title = %track.display_title(), generation, "Playback started");
                self.emit(PlaybackEvent::Started {
                    session_id: self.session_id.to_string(),
                    track_id: track.id().to_string(),
                    title: track.display_title().to_string(),
                });
                self.current = Some(track);
                true
            }
            Err(err) => {
                let err = PlaybackError::from(err);
                warn!(error = %err, "Output backend refused stream");
                self.emit(PlaybackEvent::Error {
                    session_id: self.session_id.to_string(),
                    track_id: Some(track.id().to_string()),
                    message: err.to_string(),
                    recoverable: err.is_transient(),
                });
                false
            }
        }
    }

    /// Completion callbacks may run on any thread; they only post a message.
    fn completion_callback(&self, generation: u64) -> CompletionCallback {
        let commands = self.commands.clone();
        Box::new(move |end| {
            if let Some(tx) = commands.upgrade() {
                tx.send(Command::Completion { generation, end }).ok();
            }
        })
    }

    /// Stop the output. With `suppress`, the completion this stop causes is
    /// ignored. Returns whether anything was playing.
    fn stop_output(&mut self, suppress: bool) -> bool {
        let Some(output) = self.output.take() else {
            return false;
        };

        let generation = self.generation;
        if suppress {
            self.suppressed = Some(generation);
            self.settled = self.settled.max(generation);
            self.schedule_release(generation);
        }
        output.stop();

        let track_id = self.current_track_id();
        self.current = None;
        self.state = PlayerState::Idle;
        debug!(session_id = %self.session_id, generation, suppress, "Output stopped");
        self.emit(PlaybackEvent::Stopped {
            session_id: self.session_id.to_string(),
            track_id,
        });
        true
    }

    fn schedule_release(&self, generation: u64) {
        let commands = self.commands.clone();
        let grace = self.ctx.config.suppress_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tx) = commands.upgrade() {
                tx.send(Command::ReleaseSuppress { generation }).ok();
            }
        });
    }

    fn pause(&mut self) -> bool {
        if self.state != PlayerState::Playing {
            return false;
        }
        let Some(output) = &self.output else {
            return false;
        };
        if let Err(err) = output.pause() {
            warn!(error = %err, "Pause failed");
            return false;
        }
        self.state = PlayerState::Paused;
        self.emit(PlaybackEvent::Paused {
            session_id: self.session_id.to_string(),
            track_id: self.current_track_id(),
        });
        true
    }

    fn resume(&mut self) -> bool {
        if self.state != PlayerState::Paused {
            return false;
        }
        let Some(output) = &self.output else {
            return false;
        };
        if let Err(err) = output.resume() {
            warn!(error = %err, "Resume failed");
            return false;
        }
        self.state = PlayerState::Playing;
        self.emit(PlaybackEvent::Resumed {
            session_id: self.session_id.to_string(),
            track_id: self.current_track_id(),
        });
        true
    }

    // ------------------------------------------------------------------------
    // Advancing
    // ------------------------------------------------------------------------

    /// Put `track` under the pointer (appending it if needed) and play it.
    /// If it cannot be played the next candidate is tried.
    async fn play_now(&mut self, track: Track) -> bool {
        let position = match self.tracklist.position_of(track.id()) {
            Some(position) => position,
            None => self.tracklist.add(track.clone()),
        };
        if let Err(err) = self.tracklist.select(position) {
            warn!(error = %err, "Cannot select track");
            return false;
        }

        self.stop_output(true);
        if self.start(track).await {
            return true;
        }
        self.advance().await;
        false
    }

    /// Play the current entry, moving on past entries that fail.
    async fn play_from_current(&mut self) -> bool {
        for _ in 0..self.tracklist.len().max(1) {
            let Some(track) = self.tracklist.current().cloned() else {
                break;
            };
            if self.start(track).await {
                return true;
            }
            if self.tracklist.next().is_none() {
                break;
            }
        }

        self.queue_finished();
        false
    }

    async fn advance(&mut self) -> bool {
        if self.tracklist.next().is_none() {
            self.queue_finished();
            return false;
        }
        self.play_from_current().await
    }

    async fn skip(&mut self) -> bool {
        let was_playing = self.stop_output(true);
        let finished = self.tracklist.is_exhausted()
            && self.tracklist.repeat_mode() == RepeatMode::Off;
        if !was_playing && (self.tracklist.is_empty() || finished) {
            return false;
        }
        self.advance().await
    }

    fn queue_finished(&mut self) {
        self.state = PlayerState::Idle;
        info!(session_id = %self.session_id, "Queue finished");
        self.emit(PlaybackEvent::QueueFinished {
            session_id: self.session_id.to_string(),
        });
    }

    #[instrument(skip(self, end), fields(session_id = %self.session_id))]
    async fn on_completion(&mut self, generation: u64, end: PlaybackEnd) {
        if self.suppressed == Some(generation) {
            debug!(?end, "Completion suppressed");
            return;
        }
        if generation != self.generation || generation <= self.settled {
            debug!(?end, current = self.generation, "Stale completion ignored");
            return;
        }
        self.settled = generation;

        self.output = None;
        self.state = PlayerState::Idle;
        let Some(finished) = self.current.take() else {
            self.advance().await;
            return;
        };

        match end {
            PlaybackEnd::StreamError(message) => {
                warn!(error = %message, title = %finished.display_title(), "Stream failed mid-playback");
                let replay = self.ctx.config.replay_on_stream_error
                    && self.replayed != Some(finished.id());
                self.emit(PlaybackEvent::Error {
                    session_id: self.session_id.to_string(),
                    track_id: Some(finished.id().to_string()),
                    message,
                    recoverable: replay,
                });

                if replay && self.replay(finished).await {
                    return;
                }
            }
            PlaybackEnd::Finished | PlaybackEnd::Stopped => {
                self.emit(PlaybackEvent::Completed {
                    session_id: self.session_id.to_string(),
                    track_id: finished.id().to_string(),
                });
            }
        }

        self.advance().await;
    }

    /// Refresh the locator of `track` once and play it again.
    async fn replay(&mut self, mut track: Track) -> bool {
        self.replayed = Some(track.id());
        if let Err(err) = self.ctx.refresher.force_refresh(&mut track).await {
            warn!(error = %err, "Refresh after stream error failed");
            return false;
        }
        self.tracklist.update(track.clone());
        self.start(track).await
    }
}

/// Cloneable handle to a session's driver.
#[derive(Clone)]
pub struct DriverHandle {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<PlaybackSnapshot>,
}

impl DriverHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| PlaybackError::DriverStopped)?;
        rx.await.map_err(|_| PlaybackError::DriverStopped)
    }

    /// Play `track` now, interrupting the current playback without
    /// auto-advancing.
    pub async fn play(&self, track: Track) -> Result<bool> {
        self.request(|reply| Command::Play { track, reply }).await
    }

    /// Append `track`; an idle driver starts playing it. Returns the
    /// Tracklist position.
    pub async fn enqueue(&self, track: Track) -> Result<usize> {
        self.request(|reply| Command::Enqueue { track, reply }).await
    }

    /// Append `track` without waiting for the driver. Tracks sent this way
    /// keep their send order.
    pub fn enqueue_detached(&self, track: Track) -> Result<()> {
        let (reply, _) = oneshot::channel();
        self.tx
            .send(Command::Enqueue { track, reply })
            .map_err(|_| PlaybackError::DriverStopped)
    }

    pub async fn pause(&self) -> Result<bool> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<bool> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Stop the output. With `suppress_autoadvance` the Tracklist is cleared
    /// and nothing plays until the next enqueue; without it the ended playback
    /// advances like a natural end.
    pub async fn stop(&self, suppress_autoadvance: bool) -> Result<bool> {
        self.request(|reply| Command::Stop {
            suppress: suppress_autoadvance,
            reply,
        })
        .await
    }

    /// Stop the current track and play the next one. Returns whether a track
    /// started.
    pub async fn skip(&self) -> Result<bool> {
        self.request(|reply| Command::Skip { reply }).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.request(|reply| Command::Clear { reply }).await
    }

    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<bool> {
        self.request(|reply| Command::SetRepeatMode { mode, reply })
            .await
    }

    pub async fn upcoming(&self, limit: usize) -> Result<Vec<Track>> {
        self.request(|reply| Command::Upcoming { limit, reply }).await
    }

    pub async fn remove(&self, position: usize) -> Result<Track> {
        self.request(|reply| Command::Remove { position, reply })
            .await?
    }

    pub async fn shuffle(&self) -> Result<()> {
        self.request(|reply| Command::Shuffle { reply }).await
    }

    /// Snapshot taken after every command sent before this call.
    pub async fn snapshot(&self) -> Result<PlaybackSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Latest published snapshot without a round trip.
    pub fn latest(&self) -> PlaybackSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified after every processed command.
    pub fn watch(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot.clone()
    }

    /// Stop playback, clear the Tracklist and end the driver task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("session_id", &self.session_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
