//! Loudness normalization via phase_limiter
//!
//! The tool is CPU bound and single-instance: callers hold the run's
//! mastering lock around [`LoudnessTool::normalize`].

use super::{CommandRunner, LoudnessTool, ToolError};
use async_trait::async_trait;
use mastr_common::config::MasteringConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// phase_limiter client
pub struct PhaseLimiter {
    binary_path: PathBuf,
    ffmpeg_path: PathBuf,
    reference_loudness: f64,
    matching_level: f64,
    bass_preservation: bool,
    runner: CommandRunner,
}

impl PhaseLimiter {
    pub fn new(
        binary_path: PathBuf,
        ffmpeg_path: PathBuf,
        mastering: &MasteringConfig,
        runner: CommandRunner,
    ) -> Self {
        Self {
            binary_path,
            ffmpeg_path,
            reference_loudness: mastering.reference_loudness,
            matching_level: mastering.matching_level,
            bass_preservation: mastering.bass_preservation,
            runner,
        }
    }

    /// Command-line arguments for one normalization call
    pub fn build_args(&self, input: &Path, output_wav: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(12);
        args.push("--input".into());
        args.push(input.as_os_str().to_owned());
        args.push("--output".into());
        args.push(output_wav.as_os_str().to_owned());
        args.push("--ffmpeg".into());
        args.push(self.ffmpeg_path.as_os_str().to_owned());
        args.push("--reference".into());
        args.push(format!("{}", self.reference_loudness).into());
        args.push("--mastering_matching_level".into());
        args.push(format!("{}", self.matching_level).into());
        args.push("--bass_preservation".into());
        args.push(self.bass_preservation.to_string().into());
        args
    }
}

#[async_trait]
impl LoudnessTool for PhaseLimiter {
    async fn normalize(
        &self,
        input: &Path,
        output_wav: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let args = self.build_args(input, output_wav);
        self.runner.run(&self.binary_path, &args, cancel).await?;

        if !tokio::fs::try_exists(output_wav).await.unwrap_or(false) {
            return Err(ToolError::Output {
                tool: "phase_limiter".to_string(),
                message: format!("no output written to {}", output_wav.display()),
            });
        }

        tracing::debug!(
            input = %input.display(),
            output = %output_wav.display(),
            "Loudness normalization completed"
        );
        Ok(())
    }
}
