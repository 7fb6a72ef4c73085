//! Playlist bridge.
//!
//! Persisting named playlists is a host concern; the core only needs to turn a
//! playlist name into the raw inputs it contains.

use crate::error::{BridgeError, Result};
use std::collections::HashMap;

#[async_trait::async_trait]
pub trait PlaylistSource: Send + Sync {
    /// Load the raw inputs (URLs or search terms) stored under `name`.
    ///
    /// Returns [`BridgeError::NotFound`] when no playlist has that name.
    async fn load(&self, name: &str) -> Result<Vec<String>>;

    /// List available playlist names.
    async fn list(&self) -> Result<Vec<String>>;
}

/// In-memory playlist source, useful for tests and fixed configurations.
#[derive(Debug, Clone, Default)]
pub struct StaticPlaylistSource {
    playlists: HashMap<String, Vec<String>>,
}

impl StaticPlaylistSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_playlist<I, S>(mut self, name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.playlists
            .insert(name.into(), items.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait::async_trait]
impl PlaylistSource for StaticPlaylistSource {
    async fn load(&self, name: &str) -> Result<Vec<String>> {
        self.playlists
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("playlist '{}'", name)))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.playlists.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_load() {
        let source = StaticPlaylistSource::new()
            .with_playlist("chill", ["lofi beats", "https://youtu.be/abc"]);

        let items = source.load("chill").await.unwrap();
        assert_eq!(items, vec!["lofi beats", "https://youtu.be/abc"]);
    }

    #[tokio::test]
    async fn test_static_source_missing() {
        let source = StaticPlaylistSource::new();
        let err = source.load("nope").await.unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_static_source_list_sorted() {
        let source = StaticPlaylistSource::new()
            .with_playlist("b", Vec::<String>::new())
            .with_playlist("a", Vec::<String>::new());
        assert_eq!(source.list().await.unwrap(), vec!["a", "b"]);
    }
}
