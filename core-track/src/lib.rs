//! # Track Module
//!
//! The request lifecycle entity and the per-session play queue.
//!
//! - [`Track`](models::Track): state machine from raw input to a playable
//!   stream locator or a terminal failure
//! - [`SourceKind`](models::SourceKind): closed classification of raw inputs
//!   driving extraction targets and circuit breaker classes
//! - [`Tracklist`](tracklist::Tracklist): ordered queue with a position
//!   pointer and repeat modes

pub mod error;
pub mod models;
pub mod tracklist;

pub use error::{Result, TrackError};
pub use models::{
    RequesterId, SessionId, SourceKind, Track, TrackId, TrackMetadata, TrackStatus,
};
pub use tracklist::{RepeatMode, Tracklist};
