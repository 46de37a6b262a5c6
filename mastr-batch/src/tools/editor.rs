//! Audio editing via ffmpeg

use super::{replace_atomically, temp_sibling, AudioEditor, CommandRunner, ToolError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// ffmpeg-backed editor
pub struct FfmpegEditor {
    binary_path: PathBuf,
    runner: CommandRunner,
}

impl FfmpegEditor {
    pub fn new(binary_path: PathBuf, runner: CommandRunner) -> Self {
        Self {
            binary_path,
            runner,
        }
    }

    fn base_args(input: &Path) -> Vec<OsString> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
        ]
    }

    fn mp3_args(args: &mut Vec<OsString>, bitrate_kbps: u32) {
        args.push("-codec:a".into());
        args.push("libmp3lame".into());
        args.push("-b:a".into());
        args.push(format!("{}k", bitrate_kbps).into());
    }

    pub fn encode_args(input: &Path, output: &Path, bitrate_kbps: u32) -> Vec<OsString> {
        let mut args = Self::base_args(input);
        Self::mp3_args(&mut args, bitrate_kbps);
        args.push(output.as_os_str().to_owned());
        args
    }

    pub fn cut_args(input: &Path, output: &Path, at_secs: f64) -> Vec<OsString> {
        let mut args = Self::base_args(input);
        args.push("-t".into());
        args.push(format!("{:.3}", at_secs).into());
        args.push("-c".into());
        args.push("copy".into());
        args.push(output.as_os_str().to_owned());
        args
    }

    pub fn fade_args(
        input: &Path,
        output: &Path,
        track_secs: f64,
        fade_secs: f64,
        bitrate_kbps: u32,
    ) -> Vec<OsString> {
        let fade_secs = fade_secs.min(track_secs).max(0.0);
        let start = (track_secs - fade_secs).max(0.0);
        let mut args = Self::base_args(input);
        args.push("-af".into());
        args.push(format!("afade=t=out:st={:.3}:d={:.3}:curve=tri", start, fade_secs).into());
        Self::mp3_args(&mut args, bitrate_kbps);
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Run ffmpeg into a temp sibling of `path`, then replace `path`
    async fn rewrite_in_place(
        &self,
        path: &Path,
        args_for: impl FnOnce(&Path) -> Vec<OsString>,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let temp = temp_sibling(path);
        let args = args_for(&temp);
        if let Err(e) = self.runner.run(&self.binary_path, &args, cancel).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        replace_atomically(&temp, path).await
    }
}

#[async_trait]
impl AudioEditor for FfmpegEditor {
    async fn encode_mp3(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        let input = input.to_path_buf();
        self.rewrite_in_place(
            output,
            |temp| Self::encode_args(&input, temp, bitrate_kbps),
            cancel,
        )
        .await
    }

    async fn cut(
        &self,
        path: &Path,
        at_secs: f64,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        tracing::debug!(path = %path.display(), at_secs, "Cutting track");
        let input = path.to_path_buf();
        self.rewrite_in_place(path, |temp| Self::cut_args(&input, temp, at_secs), cancel)
            .await
    }

    async fn fade_out(
        &self,
        path: &Path,
        track_secs: f64,
        fade_secs: f64,
        bitrate_kbps: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        tracing::debug!(path = %path.display(), track_secs, fade_secs, "Applying fade-out");
        let input = path.to_path_buf();
        self.rewrite_in_place(
            path,
            |temp| Self::fade_args(&input, temp, track_secs, fade_secs, bitrate_kbps),
            cancel,
        )
        .await
    }
}
