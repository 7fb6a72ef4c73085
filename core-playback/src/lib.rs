//! # Playback Module
//!
//! Per-session playback control on top of the host's output backend.
//!
//! ## Overview
//!
//! - [`PlaybackDriver`](driver::PlaybackDriver): single-task actor owning a
//!   session's Tracklist and output handle, guaranteeing exactly one advance
//!   per ended playback
//! - [`DriverHandle`](driver::DriverHandle): cloneable command surface
//! - [`StreamRefresher`](refresh::StreamRefresher): re-extracts expired stream
//!   locators before and during playback

pub mod driver;
pub mod error;
pub mod refresh;

pub use driver::{DriverContext, DriverHandle, PlaybackDriver, PlaybackSnapshot, PlayerState};
pub use error::{PlaybackError, Result};
pub use refresh::StreamRefresher;
