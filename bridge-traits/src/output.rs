//! Output bridge.
//!
//! The output backend owns the host's audio connection. The core opens one
//! stream locator at a time per session and learns about the end of playback
//! through a completion callback. Backends may invoke that callback from any
//! thread, but must invoke it at most once per opened handle.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Why a playback ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackEnd {
    /// The stream reached its natural end.
    Finished,
    /// [`OutputHandle::stop`] was called.
    Stopped,
    /// The stream failed mid-playback (expired locator, network drop).
    StreamError(String),
}

impl PlaybackEnd {
    pub fn is_error(&self) -> bool {
        matches!(self, PlaybackEnd::StreamError(_))
    }
}

/// Callback invoked exactly once when playback ends.
pub type CompletionCallback = Box<dyn FnOnce(PlaybackEnd) + Send + 'static>;

/// Handle to an open playback.
pub trait OutputHandle: Send + Sync {
    /// Stop playback. The completion callback fires with
    /// [`PlaybackEnd::Stopped`] unless the stream already ended.
    fn stop(&self);

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;
}

/// Output backend trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::output::{OutputBackend, PlaybackEnd};
///
/// async fn play(backend: &dyn OutputBackend, locator: &str) {
///     let handle = backend
///         .open(locator, Box::new(|end: PlaybackEnd| println!("ended: {:?}", end)))
///         .await
///         .unwrap();
///     handle.pause().ok();
/// }
/// ```
#[async_trait::async_trait]
pub trait OutputBackend: Send + Sync {
    /// Start playing `locator`, returning a handle to control it.
    async fn open(
        &self,
        locator: &str,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn OutputHandle>>;
}
