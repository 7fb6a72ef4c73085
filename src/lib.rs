//! Cadence: request processing and playback core.
//!
//! This crate re-exports the [`core_service`] façade so hosts can depend on a
//! single package. The individual workspace crates stay usable on their own.

pub use core_service::*;
