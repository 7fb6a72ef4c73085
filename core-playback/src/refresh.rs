//! Stream locator refresh.
//!
//! Extracted locators are signed URLs that stop working after a few hours.
//! Before a track is opened its locator age is checked against
//! `locator_max_age`, and stale locators are re-extracted in place.

use crate::error::Result;
use bridge_traits::Clock;
use core_processing::MediaResolver;
use core_runtime::events::EventBus;
use core_track::Track;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub struct StreamRefresher {
    resolver: Arc<dyn MediaResolver>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    event_bus: Option<EventBus>,
}

impl StreamRefresher {
    pub fn new(resolver: Arc<dyn MediaResolver>, clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            resolver,
            clock,
            max_age,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Whether `track` is Ready with a locator older than the safety
    /// threshold. A locator issued in the future counts as fresh.
    pub fn needs_refresh(&self, track: &Track) -> bool {
        if !track.is_ready() {
            return false;
        }
        let Some(issued_at) = track.locator_issued_at() else {
            return true;
        };

        match (self.clock.now() - issued_at).to_std() {
            Ok(age) => age > self.max_age,
            Err(_) => false,
        }
    }

    /// Refresh the locator only when it is stale. Returns whether a refresh
    /// happened.
    pub async fn ensure_fresh(&self, track: &mut Track) -> Result<bool> {
        if !self.needs_refresh(track) {
            return Ok(false);
        }
        self.force_refresh(track).await?;
        Ok(true)
    }

    /// Re-extract the locator regardless of its age.
    #[instrument(skip(self, track), fields(track_id = %track.id()))]
    pub async fn force_refresh(&self, track: &mut Track) -> Result<()> {
        debug!(input = %track.raw_input(), "Refreshing stream locator");
        let media = self
            .resolver
            .refresh(track.source_kind(), track.raw_input())
            .await?;

        track.replace_locator(media.stream_url, self.clock.now())?;
        info!(title = %track.display_title(), "Stream locator refreshed");

        if let Some(bus) = &self.event_bus {
            bus.emit(track.updated_event(&["stream_url"])).ok();
        }
        Ok(())
    }
}
