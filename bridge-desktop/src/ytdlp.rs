//! yt-dlp extraction adapter.
//!
//! Runs `yt-dlp -J` as a child process and maps its JSON dump onto
//! [`ExtractedMedia`]. The child is killed when the timeout fires or the
//! future is dropped.

use async_trait::async_trait;
use bridge_traits::extraction::{ExtractedMedia, ExtractionAdapter, ExtractionError};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

const DEFAULT_BINARY: &str = "yt-dlp";
const DEFAULT_FORMAT: &str = "bestaudio/best";
const STDERR_EXCERPT: usize = 500;

/// Stderr fragments that mean retrying the same target cannot help.
const TERMINAL_MARKERS: &[&str] = &[
    "unsupported url",
    "video unavailable",
    "private video",
    "this video is private",
    "has been removed",
    "account associated with this video has been terminated",
    "not available in your country",
    "sign in to confirm your age",
    "is not a valid url",
    "no video formats found",
    "requested format is not available",
    "http error 404",
];

/// Stderr fragments that indicate a temporary condition.
const TRANSIENT_MARKERS: &[&str] = &[
    "http error 429",
    "too many requests",
    "timed out",
    "connection reset",
    "temporary failure in name resolution",
    "network is unreachable",
    "http error 5",
    "read timed out",
    "unable to download webpage",
];

/// Configuration for [`YtDlpExtractor`].
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Binary to execute, resolved through `PATH` when relative
    pub binary: PathBuf,
    /// Format selector passed with `-f`
    pub format: String,
    /// Hard limit for one invocation
    pub timeout: Duration,
    /// Socket timeout forwarded to yt-dlp, in seconds
    pub socket_timeout_secs: u32,
    /// Additional arguments appended before the target
    pub extra_args: Vec<String>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            format: DEFAULT_FORMAT.to_string(),
            timeout: Duration::from_secs(40),
            socket_timeout_secs: 15,
            extra_args: Vec::new(),
        }
    }
}

impl YtDlpConfig {
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

/// Extraction adapter backed by the `yt-dlp` command line tool.
#[derive(Debug, Clone, Default)]
pub struct YtDlpExtractor {
    config: YtDlpConfig,
}

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, target: &str) -> Vec<String> {
        let mut args = vec![
            "-J".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "-f".to_string(),
            self.config.format.clone(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout_secs.to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push("--".to_string());
        args.push(target.to_string());
        args
    }
}

#[async_trait]
impl ExtractionAdapter for YtDlpExtractor {
    #[instrument(skip(self), fields(binary = %self.config.binary.display()))]
    async fn extract(&self, target: &str) -> Result<ExtractedMedia, ExtractionError> {
        if target.trim().is_empty() {
            return Err(ExtractionError::terminal("empty extraction target"));
        }

        let child = Command::new(&self.config.binary)
            .args(self.build_args(target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExtractionError::terminal(format!(
                    "failed to spawn {}: {}",
                    self.config.binary.display(),
                    e
                ))
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output =
            match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(ExtractionError::transient(format!(
                        "failed to read yt-dlp output: {}",
                        e
                    )))
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.config.timeout.as_secs(),
                        "yt-dlp timed out, killing"
                    );
                    return Err(ExtractionError::timeout(format!(
                        "yt-dlp did not finish within {}s",
                        self.config.timeout.as_secs()
                    )));
                }
            };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = classify_stderr(&stderr);
            debug!(kind = %err.kind, status = ?output.status.code(), "yt-dlp failed");
            return Err(err);
        }

        parse_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpDump {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    requested_formats: Vec<YtDlpFormat>,
    /// Present when the target was a search query
    #[serde(default)]
    entries: Vec<YtDlpDump>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
}

/// Map a `yt-dlp -J` dump onto [`ExtractedMedia`].
pub(crate) fn parse_output(stdout: &[u8]) -> Result<ExtractedMedia, ExtractionError> {
    let dump: YtDlpDump = serde_json::from_slice(stdout)
        .map_err(|e| ExtractionError::transient(format!("malformed yt-dlp output: {}", e)))?;

    let dump = if dump.entries.is_empty() {
        dump
    } else {
        dump.entries
            .into_iter()
            .next()
            .ok_or_else(|| ExtractionError::terminal("search returned no results"))?
    };

    let stream_url = dump
        .url
        .clone()
        .or_else(|| {
            dump.requested_formats
                .iter()
                .find(|f| f.acodec.as_deref().map_or(false, |c| c != "none"))
                .and_then(|f| f.url.clone())
        })
        .ok_or_else(|| ExtractionError::terminal("no playable stream in yt-dlp output"))?;

    let title = dump
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Unknown title".to_string());

    Ok(ExtractedMedia {
        title,
        contributor: dump.artist.or(dump.uploader).or(dump.channel),
        duration_secs: dump
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u64),
        thumbnail: dump.thumbnail,
        stream_url,
        webpage_url: dump.webpage_url,
    })
}

/// Classify a failed run from its stderr.
///
/// Unknown failures are treated as transient so the retry budget decides.
pub(crate) fn classify_stderr(stderr: &str) -> ExtractionError {
    let lower = stderr.to_lowercase();
    let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();

    if TERMINAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return ExtractionError::terminal(excerpt);
    }
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return ExtractionError::transient(excerpt);
    }
    ExtractionError::transient(if excerpt.is_empty() {
        "yt-dlp exited with an error".to_string()
    } else {
        excerpt
    })
}
