//! Beat tracking via the aubio command-line tool
//!
//! `aubio beat <file>` prints one beat timestamp (seconds) per line.
//! `aubio tempo <file>` prints a single `<bpm> bpm` line.

use super::{BeatTracker, CommandRunner, ToolError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tokio_util::sync::CancellationToken;

const TOOL: &str = "aubio";

/// aubio client
pub struct AubioBeatTracker {
    binary_path: PathBuf,
    runner: CommandRunner,
}

impl AubioBeatTracker {
    pub fn new(binary_path: PathBuf, runner: CommandRunner) -> Self {
        Self {
            binary_path,
            runner,
        }
    }

    /// Check if the binary can be launched
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary_path)
            .arg("--help")
            .output()
            .is_ok()
    }

    fn args(subcommand: &str, path: &Path) -> Vec<OsString> {
        vec![subcommand.into(), path.as_os_str().to_owned()]
    }
}

#[async_trait]
impl BeatTracker for AubioBeatTracker {
    async fn beats(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<f64>, ToolError> {
        let output = self
            .runner
            .run(&self.binary_path, &Self::args("beat", path), cancel)
            .await?;
        let beats = parse_beats(&output.stdout)?;
        tracing::debug!(path = %path.display(), beats = beats.len(), "Beat tracking completed");
        Ok(beats)
    }

    async fn tempo(&self, path: &Path, cancel: &CancellationToken) -> Result<f64, ToolError> {
        let output = self
            .runner
            .run(&self.binary_path, &Self::args("tempo", path), cancel)
            .await?;
        parse_tempo(&output.stdout)
    }
}

/// Parse beat timestamps, skipping lines that are not numbers
pub fn parse_beats(stdout: &str) -> Result<Vec<f64>, ToolError> {
    let mut skipped = 0usize;
    let mut beats: Vec<f64> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<f64>() {
            Ok(t) if t.is_finite() && t >= 0.0 => Some(t),
            _ => {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        tracing::warn!(skipped, "Ignored malformed beat tracker lines");
    }
    if beats.is_empty() {
        return Err(ToolError::Output {
            tool: TOOL.to_string(),
            message: "no beats reported".to_string(),
        });
    }

    beats.sort_by(f64::total_cmp);
    Ok(beats)
}

/// Parse a `<bpm> bpm` line
pub fn parse_tempo(stdout: &str) -> Result<f64, ToolError> {
    let bpm = stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .find_map(|token| token.parse::<f64>().ok())
        .filter(|bpm| bpm.is_finite() && *bpm > 0.0);

    bpm.ok_or_else(|| ToolError::Output {
        tool: TOOL.to_string(),
        message: format!("no tempo in output: {:?}", stdout.trim()),
    })
}
