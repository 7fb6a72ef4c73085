//! Per-session play queue.
//!
//! The position pointer is `None` exactly when the list is empty. With
//! [`RepeatMode::Off`], advancing past the last entry keeps the pointer on it
//! and marks the list as exhausted; the next `add` moves the pointer onto the
//! new entry so playback can resume from there. Switching to a repeat mode
//! revives an exhausted list on the following `next`.

use crate::error::{Result, TrackError};
use crate::models::{Track, TrackId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    #[default]
    Off,
    /// Replay the current track forever.
    Track,
    /// Wrap to the first entry after the last one.
    Queue,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RepeatMode::Off => "off",
            RepeatMode::Track => "track",
            RepeatMode::Queue => "queue",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Tracklist {
    tracks: Vec<Track>,
    position: Option<usize>,
    repeat_mode: RepeatMode,
    exhausted: bool,
}

impl Tracklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track and return its position.
    pub fn add(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        let index = self.tracks.len() - 1;

        if self.position.is_none() || self.exhausted {
            self.position = Some(index);
            self.exhausted = false;
        }

        index
    }

    /// Track under the pointer. Check [`is_exhausted`](Self::is_exhausted)
    /// to tell whether it has already been played through.
    pub fn current(&self) -> Option<&Track> {
        self.position.and_then(|p| self.tracks.get(p))
    }

    /// Advance according to the repeat mode and return the new current track.
    pub fn next(&mut self) -> Option<Track> {
        let position = self.position?;
        if self.exhausted {
            if self.repeat_mode == RepeatMode::Off {
                return None;
            }
            self.exhausted = false;
        }

        match self.repeat_mode {
            RepeatMode::Track => {}
            RepeatMode::Off => {
                if position + 1 >= self.tracks.len() {
                    self.exhausted = true;
                    debug!(position, "tracklist exhausted");
                    return None;
                }
                self.position = Some(position + 1);
            }
            RepeatMode::Queue => {
                self.position = Some((position + 1) % self.tracks.len());
            }
        }

        self.current().cloned()
    }

    /// Move the pointer to `position`, reviving an exhausted list.
    pub fn select(&mut self, position: usize) -> Result<&Track> {
        let len = self.tracks.len();
        if position >= len {
            return Err(TrackError::OutOfRange { position, len });
        }
        self.position = Some(position);
        self.exhausted = false;
        Ok(&self.tracks[position])
    }

    /// Position of the track with `id`.
    pub fn position_of(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id() == id)
    }

    /// Up to `limit` tracks that will play after the current one.
    ///
    /// In queue-repeat mode the listing wraps around but never repeats the
    /// current track.
    pub fn get_upcoming(&self, limit: usize) -> Vec<Track> {
        let Some(position) = self.position else {
            return Vec::new();
        };

        match self.repeat_mode {
            RepeatMode::Queue => {
                let len = self.tracks.len();
                (1..len)
                    .map(|offset| &self.tracks[(position + offset) % len])
                    .take(limit)
                    .cloned()
                    .collect()
            }
            RepeatMode::Off | RepeatMode::Track => self
                .tracks
                .iter()
                .skip(position + 1)
                .take(limit)
                .cloned()
                .collect(),
        }
    }

    /// Drop every track. The repeat mode is kept.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.position = None;
        self.exhausted = false;
    }

    /// Returns whether the mode changed.
    pub fn set_repeat_mode(&mut self, mode: RepeatMode) -> bool {
        if self.repeat_mode == mode {
            return false;
        }
        self.repeat_mode = mode;
        true
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Whether an off-mode advance ran past the last entry.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Replace the stored copy of `track` (matched by id).
    pub fn update(&mut self, track: Track) -> bool {
        match self.tracks.iter_mut().find(|t| t.id() == track.id()) {
            Some(slot) => {
                *slot = track;
                true
            }
            None => false,
        }
    }

    pub fn find(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    /// Remove the entry at `position`. The current entry cannot be removed
    /// while it is live; skip it instead.
    pub fn remove(&mut self, position: usize) -> Result<Track> {
        let len = self.tracks.len();
        if position >= len {
            return Err(TrackError::OutOfRange { position, len });
        }

        let current = self.position.unwrap_or(0);
        if position == current && !self.exhausted {
            return Err(TrackError::RemoveCurrent(position));
        }

        let removed = self.tracks.remove(position);

        if self.tracks.is_empty() {
            self.position = None;
            self.exhausted = false;
        } else if position < current || (position == current && current >= self.tracks.len())
        {
            self.position = Some(current.saturating_sub(1));
        }

        Ok(removed)
    }

    /// Shuffle everything after the current entry.
    pub fn shuffle_upcoming(&mut self) {
        let start = match (self.position, self.exhausted) {
            (Some(p), false) => p + 1,
            _ => return,
        };
        if start < self.tracks.len() {
            self.tracks[start..].shuffle(&mut rand::thread_rng());
        }
    }
}
