//! Extraction bridge.
//!
//! An extraction adapter turns an extraction target (a media URL or a
//! `ytsearch1:` query) into display metadata plus a time-limited stream
//! locator. Adapters are stateless and must bound their own runtime; the core
//! additionally wraps every call in a retry executor with its own timeout.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMedia {
    /// Display title
    pub title: String,
    /// Uploader, channel or artist
    pub contributor: Option<String>,
    /// Duration in whole seconds, when known
    pub duration_secs: Option<u64>,
    /// Thumbnail image locator
    pub thumbnail: Option<String>,
    /// Time-limited locator the output backend can open
    pub stream_url: String,
    /// Canonical page for the media, when the target was a search query
    pub webpage_url: Option<String>,
}

/// Classification of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionErrorKind {
    /// Rate limiting, network hiccups, tool crashes. Worth retrying.
    Transient,
    /// Invalid input, unsupported source, removed or private media.
    Terminal,
    /// The adapter gave up waiting for the external tool.
    Timeout,
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Terminal => "terminal",
            Self::Timeout => "timeout",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Extraction failed ({kind}): {message}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub message: String,
}

impl ExtractionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::Terminal,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionErrorKind::Timeout,
            message: message.into(),
        }
    }

    /// Whether retrying the same target may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ExtractionErrorKind::Transient | ExtractionErrorKind::Timeout
        )
    }
}

/// Extraction adapter trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::extraction::{ExtractionAdapter, ExtractedMedia, ExtractionError};
///
/// async fn title_of(adapter: &dyn ExtractionAdapter, url: &str) -> Result<String, ExtractionError> {
///     Ok(adapter.extract(url).await?.title)
/// }
/// ```
#[async_trait::async_trait]
pub trait ExtractionAdapter: Send + Sync {
    /// Resolve an extraction target into metadata and a stream locator.
    async fn extract(&self, target: &str) -> Result<ExtractedMedia, ExtractionError>;
}
