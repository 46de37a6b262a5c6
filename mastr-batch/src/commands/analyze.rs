//! `analyze <source>`: offline diagnostic report for one track
//!
//! Decodes and segments a local file or URL without touching the job store.
//! With a beat tracker, tempo drift is measured too; a remote source is then
//! downloaded once to scratch and both decoded and tracked from that copy.

use crate::error::BatchResult;
use crate::models::Segment;
use crate::services::audio_analyzer::{AudioAnalyzer, EdgeSilence};
use crate::services::audio_decoder::{decode, decode_local, AudioSource};
use crate::services::flag_classifier::{classify, TempoDrift};
use crate::services::mastering::cut_point;
use crate::services::MediaFetcher;
use crate::tools::BeatTracker;
use mastr_common::config::TomlConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Tempo measurements, present when a beat tracker ran
#[derive(Debug, Clone, Serialize)]
pub struct TempoReport {
    pub tempo_bpm: f64,
    pub beats: usize,
    pub drift: TempoDrift,
}

/// JSON report printed by `analyze`
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub source: String,
    pub sample_rate: u32,
    pub duration_secs: f64,
    pub silences: Vec<Segment>,
    pub noises: Vec<Segment>,
    pub first_silence: Option<EdgeSilence>,
    pub end_silence: Option<EdgeSilence>,
    /// Where mastering would cut, if anywhere
    pub cut_at: Option<f64>,
    pub tempo: Option<TempoReport>,
    /// Flags as they would be stored if the track were mastered unchanged
    pub flags: String,
}

/// Options for one `analyze` call
pub struct AnalyzeOptions<'a> {
    pub beat_tracker: Option<&'a dyn BeatTracker>,
    pub waveform_out: Option<&'a Path>,
    /// Where remote sources are downloaded for beat tracking
    pub scratch_dir: PathBuf,
}

/// Build the report for `location`
pub async fn analyze(
    location: &str,
    settings: &TomlConfig,
    fetcher: &MediaFetcher,
    options: AnalyzeOptions<'_>,
    cancel: &CancellationToken,
) -> BatchResult<AnalysisReport> {
    let source = AudioSource::parse(location);

    let download = match (&source, options.beat_tracker) {
        (AudioSource::Remote(url), Some(_)) => {
            let stem = format!("analyze-{}", uuid::Uuid::new_v4());
            Some(fetcher.fetch_to(url, &options.scratch_dir, &stem, cancel).await?)
        }
        _ => None,
    };

    let result = build_report(location, &source, download.as_deref(), settings, fetcher, &options, cancel).await;
    if let Some(path) = &download {
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}

async fn build_report(
    location: &str,
    source: &AudioSource,
    download: Option<&Path>,
    settings: &TomlConfig,
    fetcher: &MediaFetcher,
    options: &AnalyzeOptions<'_>,
    cancel: &CancellationToken,
) -> BatchResult<AnalysisReport> {
    let audio = match download {
        Some(path) => decode_local(path).await?,
        None => decode(source, fetcher.client(), cancel).await?,
    };
    let analyzer = AudioAnalyzer::new(&audio, &settings.analysis)?;
    let duration = analyzer.duration();

    let tracked = match source {
        AudioSource::Local(path) => Some(path.as_path()),
        AudioSource::Remote(_) => download,
    };
    let tempo = match (options.beat_tracker, tracked) {
        (Some(tracker), Some(path)) => Some(measure_tempo(&analyzer, tracker, path, cancel).await?),
        _ => None,
    };

    if let Some(out) = options.waveform_out {
        let png = analyzer.plot_wave(location)?;
        tokio::fs::write(out, png).await?;
        tracing::info!(path = %out.display(), "Waveform written");
    }

    let cut_at = cut_point(
        analyzer.segmentation().last_silence(),
        duration,
        settings.mastering.cut_tail_window_secs,
    );
    let drift = tempo.as_ref().map(|t| t.drift).unwrap_or_default();
    let flags = classify(
        analyzer.silences(),
        duration,
        drift,
        cut_at.is_some(),
        &settings.flags,
    )
    .to_wire()?;

    Ok(AnalysisReport {
        source: location.to_string(),
        sample_rate: audio.sample_rate,
        duration_secs: duration,
        silences: analyzer.silences().to_vec(),
        noises: analyzer.noises().to_vec(),
        first_silence: analyzer.first_silence(),
        end_silence: analyzer.end_silence(),
        cut_at,
        tempo,
        flags,
    })
}

async fn measure_tempo(
    analyzer: &AudioAnalyzer<'_>,
    tracker: &dyn BeatTracker,
    path: &Path,
    cancel: &CancellationToken,
) -> BatchResult<TempoReport> {
    let beats = tracker.beats(path, cancel).await?;
    let tempo_bpm = tracker.tempo(path, cancel).await?;
    Ok(TempoReport {
        tempo_bpm,
        beats: beats.len(),
        drift: TempoDrift {
            halves: analyzer.bpm_change(&beats, 1, tempo_bpm),
            quarters: analyzer.bpm_change(&beats, 3, tempo_bpm),
            fragments: analyzer.bpm_change_in_fragments(&beats, tempo_bpm),
        },
    })
}
