//! External tool capabilities
//!
//! The mastering pipeline never spawns processes directly. It talks to three
//! capability traits so tests can substitute scripted fakes for the real
//! binaries:
//! - [`LoudnessTool`]: loudness normalization (phase_limiter)
//! - [`AudioEditor`]: MP3 encode, lossless cut, fade-out (ffmpeg)
//! - [`BeatTracker`]: beat timestamps and dominant tempo (aubio)

pub mod beat_tracker;
pub mod editor;
pub mod loudness;
pub mod runner;

pub use beat_tracker::AubioBeatTracker;
pub use editor::FfmpegEditor;
pub use loudness::PhaseLimiter;
pub use runner::{CommandRunner, ToolOutput};

use async_trait::async_trait;
use mastr_common::config::ToolsConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// External tool errors
#[derive(Debug, Error)]
pub enum ToolError {
    /// Binary not found in PATH
    #[error("{tool} binary not found")]
    NotFound { tool: String },

    /// Failed to launch the process
    #[error("Failed to execute {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exited with a failure status
    #[error("{tool} failed (exit code {code:?}): {stderr}")]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Process exceeded its time budget and was killed
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    /// Cancellation signal reached the process
    #[error("{tool} cancelled")]
    Cancelled { tool: String },

    /// Process succeeded but its output was unusable
    #[error("Unusable {tool} output: {message}")]
    Output { tool: String, message: String },

    /// I/O error around the call (temp files, rename)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Timeout { .. } | ToolError::Cancelled { .. })
    }
}

/// Loudness normalization
#[async_trait]
pub trait LoudnessTool: Send + Sync {
    /// Normalize `input`, writing a WAV to `output_wav`
    async fn normalize(
        &self,
        input: &Path,
        output_wav: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError>;
}

/// Audio editing
///
/// In-place operations write to a temp file next to `path` and rename it
/// over the original, so a failed call never leaves a truncated output.
#[async_trait]
pub trait AudioEditor: Send + Sync {
    /// Encode `input` to MP3 at `bitrate_kbps`
    async fn encode_mp3(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError>;

    /// Keep only `[0, at_secs)` using a lossless stream copy
    async fn cut(&self, path: &Path, at_secs: f64, cancel: &CancellationToken)
        -> Result<(), ToolError>;

    /// Linear amplitude ramp to silence over the last `fade_secs`
    async fn fade_out(
        &self,
        path: &Path,
        track_secs: f64,
        fade_secs: f64,
        bitrate_kbps: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError>;
}

/// Beat tracking
#[async_trait]
pub trait BeatTracker: Send + Sync {
    /// Beat timestamps in seconds, ascending
    async fn beats(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<f64>, ToolError>;

    /// Single dominant tempo estimate in BPM
    async fn tempo(&self, path: &Path, cancel: &CancellationToken) -> Result<f64, ToolError>;
}

/// The tool set one run works with
#[derive(Clone)]
pub struct Toolbox {
    pub loudness: Arc<dyn LoudnessTool>,
    pub editor: Arc<dyn AudioEditor>,
    pub beats: Arc<dyn BeatTracker>,
}

impl Toolbox {
    /// Subprocess-backed tools from configuration
    pub fn from_config(config: &ToolsConfig, mastering: &mastr_common::config::MasteringConfig) -> Self {
        let runner = CommandRunner::new(Duration::from_secs(config.timeout_secs));
        Self {
            loudness: Arc::new(PhaseLimiter::new(
                config.loudness.clone(),
                config.ffmpeg.clone(),
                mastering,
                runner.clone(),
            )),
            editor: Arc::new(FfmpegEditor::new(config.ffmpeg.clone(), runner.clone())),
            beats: Arc::new(AubioBeatTracker::new(config.beat_tracker.clone(), runner)),
        }
    }
}

/// Sibling temp path that keeps the extension, so tools can infer the format
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}.{}.tmp.{}", stem, uuid::Uuid::new_v4(), ext),
        None => format!(".{}.{}.tmp", stem, uuid::Uuid::new_v4()),
    };
    path.with_file_name(name)
}

/// Rename `temp` over `target`, removing `temp` if the rename fails
pub(crate) async fn replace_atomically(temp: &Path, target: &Path) -> Result<(), ToolError> {
    if let Err(e) = tokio::fs::rename(temp, target).await {
        let _ = tokio::fs::remove_file(temp).await;
        return Err(ToolError::Io(e));
    }
    Ok(())
}
