//! Track domain model
//!
//! A [`Track`] follows one user request from raw input to either a playable
//! stream or a terminal failure:
//!
//! ```text
//! Pending ──> Processing ──> Ready ──(replace_locator)──> Ready
//!    │            │
//!    └────────────┴────────> Failed
//! ```
//!
//! Fields are private so the status and the optional fields cannot drift apart:
//! a Ready track always has metadata and a stream locator and never an error,
//! and a Failed track always has an error.

use crate::error::{Result, TrackError};
use bridge_traits::ExtractedMedia;
use chrono::{DateTime, Utc};
use core_runtime::events::{CoreEvent, TrackEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Playback session (one per voice channel / guild).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// User who asked for a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterId(String);

impl RequesterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequesterId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Source kind
// =============================================================================

/// Where a raw input points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    YouTube,
    SoundCloud,
    Spotify,
    /// Any other http(s) URL; handed to the adapter unchanged.
    Generic,
    /// Free text, resolved through a search.
    Search,
}

impl SourceKind {
    /// Classify a raw input.
    pub fn detect(raw: &str) -> Self {
        let Ok(url) = Url::parse(raw.trim()) else {
            return SourceKind::Search;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return SourceKind::Search;
        }
        let Some(host) = url.host_str() else {
            return SourceKind::Search;
        };

        let host = host.trim_start_matches("www.").trim_start_matches("m.");
        match host {
            "youtube.com" | "music.youtube.com" | "youtu.be" | "youtube-nocookie.com" => {
                SourceKind::YouTube
            }
            "soundcloud.com" | "on.soundcloud.com" => SourceKind::SoundCloud,
            "open.spotify.com" | "spotify.link" => SourceKind::Spotify,
            _ => SourceKind::Generic,
        }
    }

    /// Argument handed to the extraction adapter for `raw`.
    pub fn extraction_target(&self, raw: &str) -> String {
        let raw = raw.trim();
        match self {
            SourceKind::Search => format!("ytsearch1:{}", raw),
            SourceKind::YouTube
            | SourceKind::SoundCloud
            | SourceKind::Spotify
            | SourceKind::Generic => raw.to_string(),
        }
    }

    /// Operation class used to group circuit breakers.
    pub fn class(&self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::SoundCloud => "soundcloud",
            SourceKind::Spotify => "spotify",
            SourceKind::Generic => "generic",
            SourceKind::Search => "search",
        }
    }

    pub const ALL: [SourceKind; 5] = [
        SourceKind::YouTube,
        SourceKind::SoundCloud,
        SourceKind::Spotify,
        SourceKind::Generic,
        SourceKind::Search,
    ];
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class())
    }
}

// =============================================================================
// Status and metadata
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl TrackStatus {
    /// Ready and Failed are only left through `replace_locator` (Ready) or a
    /// fresh resubmission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackStatus::Ready | TrackStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Pending => "pending",
            TrackStatus::Processing => "processing",
            TrackStatus::Ready => "ready",
            TrackStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display metadata for a resolved track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub contributor: Option<String>,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    /// Canonical page, useful when the request was a search
    pub webpage_url: Option<String>,
}

impl TrackMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            contributor: None,
            duration_secs: None,
            thumbnail: None,
            webpage_url: None,
        }
    }
}

impl From<&ExtractedMedia> for TrackMetadata {
    fn from(media: &ExtractedMedia) -> Self {
        Self {
            title: media.title.clone(),
            contributor: media.contributor.clone(),
            duration_secs: media.duration_secs,
            thumbnail: media.thumbnail.clone(),
            webpage_url: media.webpage_url.clone(),
        }
    }
}

// =============================================================================
// Track
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrackRecord")]
pub struct Track {
    id: TrackId,
    raw_input: String,
    source_kind: SourceKind,
    status: TrackStatus,
    metadata: Option<TrackMetadata>,
    stream_url: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    locator_issued_at: Option<DateTime<Utc>>,
    requester_id: RequesterId,
    session_id: SessionId,
}

/// Wire shape of a [`Track`]. Deserialized tracks pass through
/// `TryFrom<TrackRecord>` so a stored record cannot break the status
/// invariants.
#[derive(Deserialize)]
struct TrackRecord {
    id: TrackId,
    raw_input: String,
    source_kind: SourceKind,
    status: TrackStatus,
    metadata: Option<TrackMetadata>,
    stream_url: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    locator_issued_at: Option<DateTime<Utc>>,
    requester_id: RequesterId,
    session_id: SessionId,
}

impl TryFrom<TrackRecord> for Track {
    type Error = TrackError;

    fn try_from(record: TrackRecord) -> Result<Self> {
        if record.raw_input.trim().is_empty() {
            return Err(TrackError::InvalidInput(
                "request input cannot be empty".to_string(),
            ));
        }

        let ready = record.status == TrackStatus::Ready;
        let failed = record.status == TrackStatus::Failed;
        let has_locator = record.metadata.is_some()
            && record.stream_url.is_some()
            && record.locator_issued_at.is_some();

        if ready && (!has_locator || record.error.is_some()) {
            return Err(TrackError::InconsistentRecord(
                "ready track needs metadata and a stream locator and no error".to_string(),
            ));
        }
        if !ready && record.stream_url.is_some() {
            return Err(TrackError::InconsistentRecord(format!(
                "{} track cannot carry a stream locator",
                record.status
            )));
        }
        if failed != record.error.is_some() {
            return Err(TrackError::InconsistentRecord(
                "only a failed track carries an error".to_string(),
            ));
        }

        Ok(Self {
            id: record.id,
            raw_input: record.raw_input,
            source_kind: record.source_kind,
            status: record.status,
            metadata: record.metadata,
            stream_url: record.stream_url,
            error: record.error,
            created_at: record.created_at,
            processed_at: record.processed_at,
            locator_issued_at: record.locator_issued_at,
            requester_id: record.requester_id,
            session_id: record.session_id,
        })
    }
}

impl Track {
    /// Create a pending track for `raw_input`.
    pub fn new(
        raw_input: impl Into<String>,
        requester_id: RequesterId,
        session_id: SessionId,
    ) -> Result<Self> {
        let raw_input = raw_input.into().trim().to_string();
        if raw_input.is_empty() {
            return Err(TrackError::InvalidInput(
                "request input cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: TrackId::new(),
            source_kind: SourceKind::detect(&raw_input),
            raw_input,
            status: TrackStatus::Pending,
            metadata: None,
            stream_url: None,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
            locator_issued_at: None,
            requester_id,
            session_id,
        })
    }

    /// Fresh pending copy for explicit resubmission of a failed request.
    pub fn resubmission(&self) -> Self {
        Self {
            id: TrackId::new(),
            raw_input: self.raw_input.clone(),
            source_kind: self.source_kind,
            status: TrackStatus::Pending,
            metadata: None,
            stream_url: None,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
            locator_issued_at: None,
            requester_id: self.requester_id.clone(),
            session_id: self.session_id.clone(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn status(&self) -> TrackStatus {
        self.status
    }

    pub fn metadata(&self) -> Option<&TrackMetadata> {
        self.metadata.as_ref()
    }

    pub fn stream_url(&self) -> Option<&str> {
        self.stream_url.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn locator_issued_at(&self) -> Option<DateTime<Utc>> {
        self.locator_issued_at
    }

    pub fn requester_id(&self) -> &RequesterId {
        &self.requester_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Title for display, falling back to the raw input.
    pub fn display_title(&self) -> &str {
        self.metadata
            .as_ref()
            .map(|m| m.title.as_str())
            .unwrap_or(&self.raw_input)
    }

    pub fn is_ready(&self) -> bool {
        self.status == TrackStatus::Ready
    }

    pub fn is_failed(&self) -> bool {
        self.status == TrackStatus::Failed
    }

    /// Claim the track for extraction. Re-entering Processing is allowed so a
    /// retried task can claim it again.
    pub fn mark_processing(&mut self) -> Result<()> {
        self.validate_transition(TrackStatus::Processing)?;
        self.status = TrackStatus::Processing;
        self.processed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_ready(
        &mut self,
        metadata: TrackMetadata,
        stream_url: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Result<()> {
        self.validate_transition(TrackStatus::Ready)?;
        self.status = TrackStatus::Ready;
        self.metadata = Some(metadata);
        self.stream_url = Some(stream_url.into());
        self.locator_issued_at = Some(issued_at);
        self.error = None;
        self.processed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<()> {
        self.validate_transition(TrackStatus::Failed)?;
        self.status = TrackStatus::Failed;
        self.error = Some(error.into());
        self.processed_at = Some(Utc::now());
        Ok(())
    }

    /// Swap in a freshly extracted locator without leaving Ready.
    pub fn replace_locator(
        &mut self,
        stream_url: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != TrackStatus::Ready {
            return Err(TrackError::InvalidTransition {
                from: self.status,
                to: TrackStatus::Ready,
            });
        }
        self.stream_url = Some(stream_url.into());
        self.locator_issued_at = Some(issued_at);
        Ok(())
    }

    /// Event announcing a metadata or locator change.
    pub fn updated_event(&self, updated_fields: &[&str]) -> CoreEvent {
        CoreEvent::Track(TrackEvent::Updated {
            track_id: self.id.to_string(),
            session_id: self.session_id.to_string(),
            updated_fields: updated_fields.iter().map(|f| f.to_string()).collect(),
        })
    }

    fn validate_transition(&self, to: TrackStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (TrackStatus::Pending, TrackStatus::Processing) => true,
            (TrackStatus::Pending, TrackStatus::Ready) => true,
            (TrackStatus::Pending, TrackStatus::Failed) => true,

            (TrackStatus::Processing, TrackStatus::Processing) => true,
            (TrackStatus::Processing, TrackStatus::Ready) => true,
            (TrackStatus::Processing, TrackStatus::Failed) => true,

            (TrackStatus::Ready, _) => false,
            (TrackStatus::Failed, _) => false,

            _ => false,
        };

        if !valid {
            return Err(TrackError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        Ok(())
    }
}
