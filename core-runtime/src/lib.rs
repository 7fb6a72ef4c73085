//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every Cadence crate:
//! - Configuration (`CoreConfig` and component configs)
//! - Event bus
//! - Logging and tracing
//!
//! ## Overview
//!
//! This crate owns no playback or processing logic. It establishes the
//! configuration surface, the logging conventions and the event types that the
//! processing pipeline and playback drivers publish.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
