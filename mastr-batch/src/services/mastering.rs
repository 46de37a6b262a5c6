//! Mastering pipeline
//!
//! Turns one raw track into a finished MP3:
//! 1. Loudness-normalize (under the run's mastering lock) and re-encode.
//! 2. Segment the mastered audio.
//! 3. Cut at the last silence when it is terminal or ends inside the tail
//!    window, which counts as a natural ending.
//! 4. Fade out: short after a cut, long otherwise to soften an abrupt end.
//! 5. Decode and segment the final file again for definitive numbers.
//! 6. Beat-track the final file and measure tempo drift.

use crate::dispatch::JobContext;
use crate::error::BatchResult;
use crate::models::Segment;
use crate::services::audio_analyzer::{AudioAnalyzer, EdgeSilence, Segmentation};
use crate::services::audio_decoder::decode_local;
use crate::services::flag_classifier::{classify, Flags, TempoDrift};
use crate::tools::Toolbox;
use mastr_common::config::{AnalysisConfig, FlagsConfig, MasteringConfig};
use mastr_common::human_time::format_track_time;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// File name of the mastered output inside the work directory
pub const MASTER_FILE_NAME: &str = "master.mp3";

/// Everything the pipeline learned about one mastered track
#[derive(Debug, Clone)]
pub struct MasterOutcome {
    /// Final mastered MP3
    pub path: PathBuf,
    /// Duration of the final file in seconds
    pub duration_secs: f64,
    /// A terminal silence was found and cut away
    pub natural_end: bool,
    /// Cut position in the pre-cut master, when cut
    pub cut_at: Option<f64>,
    /// Length of the applied fade-out
    pub fade_secs: f64,
    /// Segments of the final file
    pub segmentation: Segmentation,
    pub end_silence: Option<EdgeSilence>,
    pub beats: Vec<f64>,
    pub tempo_bpm: f64,
    pub drift: TempoDrift,
    /// Waveform PNG of the final file
    pub waveform_png: Vec<u8>,
}

impl MasterOutcome {
    /// Anomaly flags for this track
    pub fn flags(&self, config: &FlagsConfig) -> Flags {
        classify(
            &self.segmentation.silences,
            self.duration_secs,
            self.drift,
            self.natural_end,
            config,
        )
    }
}

/// Where to cut, given the last silence of the mastered track
///
/// A silence that reaches the end, or ends within `tail_window_secs` of it,
/// marks a natural ending; the cut lands at its start. A silence starting at
/// zero would leave nothing and is ignored.
pub fn cut_point(last_silence: Option<&Segment>, duration_secs: f64, tail_window_secs: f64) -> Option<f64> {
    let silence = last_silence?;
    if silence.start <= 0.0 {
        return None;
    }
    if silence.is_final || silence.end >= duration_secs - tail_window_secs {
        Some(silence.start)
    } else {
        None
    }
}

/// Mastering pipeline
pub struct MasteringPipeline {
    tools: Toolbox,
    analysis: AnalysisConfig,
    mastering: MasteringConfig,
}

impl MasteringPipeline {
    pub fn new(tools: Toolbox, analysis: AnalysisConfig, mastering: MasteringConfig) -> Self {
        Self {
            tools,
            analysis,
            mastering,
        }
    }

    /// Master `input`, writing intermediates and the result into `workdir`
    pub async fn master(&self, input: &Path, workdir: &Path, ctx: &JobContext) -> BatchResult<MasterOutcome> {
        let started = Instant::now();
        let cancel = &ctx.cancel;
        let bitrate = self.mastering.bitrate_kbps;
        tokio::fs::create_dir_all(workdir).await?;

        // Loudness normalization: the tool runs one instance at a time
        let normalized = workdir.join("normalized.wav");
        {
            let _guard = ctx.locks.mastering.acquire(cancel).await?;
            self.tools.loudness.normalize(input, &normalized, cancel).await?;
        }

        let mastered = workdir.join(MASTER_FILE_NAME);
        self.tools
            .editor
            .encode_mp3(&normalized, &mastered, bitrate, cancel)
            .await?;
        if let Err(e) = tokio::fs::remove_file(&normalized).await {
            tracing::debug!(path = %normalized.display(), error = %e, "Could not remove intermediate");
        }

        // Cut and fade decisions on the mastered audio
        let (duration, cut_at) = {
            let audio = decode_local(&mastered).await?;
            let analyzer = AudioAnalyzer::new(&audio, &self.analysis)?;
            let duration = analyzer.duration();
            let cut_at = cut_point(
                analyzer.segmentation().last_silence(),
                duration,
                self.mastering.cut_tail_window_secs,
            );
            (duration, cut_at)
        };

        if let Some(at) = cut_at {
            self.tools.editor.cut(&mastered, at, cancel).await?;
        }
        let natural_end = cut_at.is_some();
        let track_secs = cut_at.unwrap_or(duration);
        let fade_secs = if natural_end {
            self.mastering.short_fade_out_secs
        } else {
            self.mastering.long_fade_out_secs
        };
        self.tools
            .editor
            .fade_out(&mastered, track_secs, fade_secs, bitrate, cancel)
            .await?;

        tracing::debug!(
            input = %input.display(),
            duration = %format_track_time(duration),
            cut_at = ?cut_at.map(format_track_time),
            fade_secs,
            "Applied ending"
        );

        // Definitive numbers from the final file
        let audio = decode_local(&mastered).await?;
        let analyzer = AudioAnalyzer::new(&audio, &self.analysis)?;
        let final_duration = analyzer.duration();

        let beats = self.tools.beats.beats(&mastered, cancel).await?;
        let tempo_bpm = self.tools.beats.tempo(&mastered, cancel).await?;
        let drift = TempoDrift {
            halves: analyzer.bpm_change(&beats, 1, tempo_bpm),
            quarters: analyzer.bpm_change(&beats, 3, tempo_bpm),
            fragments: analyzer.bpm_change_in_fragments(&beats, tempo_bpm),
        };

        let label = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let waveform_png = analyzer.plot_wave(&label)?;

        tracing::info!(
            input = %input.display(),
            duration = %format_track_time(final_duration),
            natural_end,
            tempo_bpm,
            beats = beats.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Mastering completed"
        );

        Ok(MasterOutcome {
            path: mastered,
            duration_secs: final_duration,
            natural_end,
            cut_at,
            fade_secs,
            segmentation: analyzer.segmentation().clone(),
            end_silence: analyzer.end_silence(),
            beats,
            tempo_bpm,
            drift,
            waveform_png,
        })
    }
}
