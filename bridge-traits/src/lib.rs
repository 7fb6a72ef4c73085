//! # Host Bridge Traits
//!
//! Collaborator contracts that the Cadence core depends on but does not
//! implement itself.
//!
//! ## Overview
//!
//! The core turns user requests into playable streams. Two pieces of that work
//! are delegated to the host through the traits in this crate:
//!
//! - [`ExtractionAdapter`](extraction::ExtractionAdapter) - resolves a raw input
//!   (URL or search term) into metadata plus a time-limited stream locator
//! - [`OutputBackend`](output::OutputBackend) - opens a stream locator on the
//!   host's audio output and reports when playback ends
//!
//! Optional collaborators:
//!
//! - [`PlaylistSource`](playlist::PlaylistSource) - looks up named playlists
//! - [`Clock`](time::Clock) - time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - forwards structured logs to the host
//!
//! ## Fail-Fast Strategy
//!
//! `core_runtime::config::CoreConfig::builder()` rejects a configuration with
//! missing required bridges using `Error::CapabilityMissing`, so a host learns
//! about a missing adapter at startup instead of on the first request.
//!
//! ## Error Handling
//!
//! Extraction reports [`ExtractionError`](extraction::ExtractionError), which
//! carries a transient/terminal classification consumed by the retry and
//! circuit-breaking layers. Every other bridge uses
//! [`BridgeError`](error::BridgeError).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`. Completion callbacks handed to the
//! output backend may be invoked from any thread.

pub mod error;
pub mod extraction;
pub mod output;
pub mod playlist;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use extraction::{
    ExtractedMedia, ExtractionAdapter, ExtractionError, ExtractionErrorKind,
};
pub use output::{CompletionCallback, OutputBackend, OutputHandle, PlaybackEnd};
pub use playlist::{PlaylistSource, StaticPlaylistSource};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
