//! # Event Bus System
//!
//! Decoupled notifications between the processing pipeline, playback drivers
//! and the host, built on `tokio::sync::broadcast`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Worker pool  ├──────────────>│           │
//! └──────────────┘               │           │     subscribe    ┌────────────┐
//!                                │ EventBus  ├─────────────────>│ Host (chat │
//! ┌──────────────┐     emit      │ (broadcast│                  │  frontend) │
//! │ Playback     ├──────────────>│  channel) │                  └────────────┘
//! │ drivers      │               │           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Playback(_)));
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::QueueFinished {
//!     session_id: "guild-1".to_string(),
//! }))
//! .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Queue finished");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! Publishers ignore `emit` errors: having no subscriber is normal.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Track(TrackEvent),
    Task(TaskEvent),
    Playback(PlaybackEvent),
    System(SystemEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Track(e) => e.description(),
            CoreEvent::Task(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::System(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Track(TrackEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::System(SystemEvent::CircuitOpened { .. }) => EventSeverity::Error,
            CoreEvent::Track(TrackEvent::Ready { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::Started { .. }) => EventSeverity::Info,
            CoreEvent::System(SystemEvent::CircuitClosed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Session the event belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Track(TrackEvent::Ready { session_id, .. })
            | CoreEvent::Track(TrackEvent::Failed { session_id, .. })
            | CoreEvent::Track(TrackEvent::Updated { session_id, .. }) => Some(session_id),
            CoreEvent::Playback(e) => Some(e.session_id()),
            _ => None,
        }
    }
}

/// Event severity level for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Track Events
// ============================================================================

/// Track lifecycle notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TrackEvent {
    /// Extraction succeeded.
    Ready {
        track_id: String,
        session_id: String,
        title: String,
        was_cached: bool,
    },
    /// Track reached its terminal failure state.
    Failed {
        track_id: String,
        session_id: String,
        input: String,
        message: String,
        /// Whether the failure was caused by an open circuit
        circuit_open: bool,
    },
    /// Stream locator or metadata changed.
    Updated {
        track_id: String,
        session_id: String,
        updated_fields: Vec<String>,
    },
}

impl TrackEvent {
    fn description(&self) -> &str {
        match self {
            TrackEvent::Ready { .. } => "Track ready",
            TrackEvent::Failed { .. } => "Track failed",
            TrackEvent::Updated { .. } => "Track updated",
        }
    }
}

// ============================================================================
// Task Events
// ============================================================================

/// Processing task notifications from the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TaskEvent {
    Queued {
        task_id: String,
        track_id: String,
        priority: String,
    },
    Progress {
        task_id: String,
        percent: u8,
    },
    Retrying {
        task_id: String,
        attempt: u32,
        delay_ms: u64,
        message: String,
    },
    Completed {
        task_id: String,
        track_id: String,
    },
    Failed {
        task_id: String,
        track_id: String,
        message: String,
    },
    Cancelled {
        task_id: String,
    },
}

impl TaskEvent {
    fn description(&self) -> &str {
        match self {
            TaskEvent::Queued { .. } => "Task queued",
            TaskEvent::Progress { .. } => "Task in progress",
            TaskEvent::Retrying { .. } => "Task scheduled for retry",
            TaskEvent::Completed { .. } => "Task completed",
            TaskEvent::Failed { .. } => "Task failed",
            TaskEvent::Cancelled { .. } => "Task cancelled",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    Started {
        session_id: String,
        track_id: String,
        title: String,
    },
    Paused {
        session_id: String,
        track_id: String,
    },
    Resumed {
        session_id: String,
        track_id: String,
    },
    Stopped {
        session_id: String,
        track_id: String,
    },
    /// Track played to its natural end.
    Completed {
        session_id: String,
        track_id: String,
    },
    /// Tracklist ran out while auto-advancing.
    QueueFinished {
        session_id: String,
    },
    Error {
        session_id: String,
        track_id: Option<String>,
        message: String,
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Resumed { .. } => "Playback resumed",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::Completed { .. } => "Track completed",
            PlaybackEvent::QueueFinished { .. } => "Queue finished",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            PlaybackEvent::Started { session_id, .. }
            | PlaybackEvent::Paused { session_id, .. }
            | PlaybackEvent::Resumed { session_id, .. }
            | PlaybackEvent::Stopped { session_id, .. }
            | PlaybackEvent::Completed { session_id, .. }
            | PlaybackEvent::QueueFinished { session_id }
            | PlaybackEvent::Error { session_id, .. } => session_id,
        }
    }
}

// ============================================================================
// System Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SystemEvent {
    CircuitOpened {
        class: String,
        failures: u32,
    },
    CircuitClosed {
        class: String,
    },
    CacheSwept {
        evicted: usize,
        remaining: usize,
    },
}

impl SystemEvent {
    fn description(&self) -> &str {
        match self {
            SystemEvent::CircuitOpened { .. } => "Circuit opened",
            SystemEvent::CircuitClosed { .. } => "Circuit closed",
            SystemEvent::CacheSwept { .. } => "Cache swept",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to every subscriber.
    ///
    /// Returns the number of subscribers that received it, or an error when
    /// nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver wrapper with an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only events that belong to `session_id`.
    pub fn for_session(self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        self.filter(move |event| event.session_id() == Some(session_id.as_str()))
    }

    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(session: &str) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::Started {
            session_id: session.to_string(),
            track_id: "t-1".to_string(),
            title: "Song".to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(started("s")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = started("s");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|e| matches!(e, CoreEvent::Task(_)));

        bus.emit(started("s")).unwrap();
        let progress = CoreEvent::Task(TaskEvent::Progress {
            task_id: "1".to_string(),
            percent: 30,
        });
        bus.emit(progress.clone()).unwrap();

        assert_eq!(stream.recv().await.unwrap(), progress);
    }

    #[tokio::test]
    async fn test_event_stream_for_session() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_session("b");

        bus.emit(started("a")).unwrap();
        bus.emit(CoreEvent::System(SystemEvent::CircuitClosed {
            class: "youtube".to_string(),
        }))
        .unwrap();
        bus.emit(started("b")).unwrap();

        assert_eq!(stream.recv().await.unwrap(), started("b"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(CoreEvent::Task(TaskEvent::Cancelled {
                task_id: i.to_string(),
            }))
            .unwrap();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Track(TrackEvent::Failed {
            track_id: "t".to_string(),
            session_id: "s".to_string(),
            input: "x".to_string(),
            message: "Video unavailable".to_string(),
            circuit_open: false,
        });
        assert_eq!(failed.severity(), EventSeverity::Warning);

        let opened = CoreEvent::System(SystemEvent::CircuitOpened {
            class: "youtube".to_string(),
            failures: 5,
        });
        assert_eq!(opened.severity(), EventSeverity::Error);
        assert_eq!(started("s").severity(), EventSeverity::Info);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Track(TrackEvent::Ready {
            track_id: "t".to_string(),
            session_id: "s".to_string(),
            title: "Song".to_string(),
            was_cached: true,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Track\""));
        assert!(json.contains("\"event\":\"Ready\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
