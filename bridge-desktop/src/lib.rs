//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `ExtractionAdapter` using the `yt-dlp` command line tool via
//!   `tokio::process`
//!
//! Output backends are host specific (voice gateway, local sound card) and are
//! always injected by the application.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{YtDlpConfig, YtDlpExtractor};
//! use std::time::Duration;
//!
//! let extractor = YtDlpExtractor::with_config(
//!     YtDlpConfig::default().with_timeout(Duration::from_secs(30)),
//! );
//! ```

mod ytdlp;

pub use ytdlp::{YtDlpConfig, YtDlpExtractor};
