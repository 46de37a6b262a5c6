//! Envelope analysis: silence/noise segmentation and tempo drift
//!
//! The analyzer computes an RMS envelope over fixed windows (50ms by default)
//! and partitions the track into alternating silence and noise segments that
//! jointly cover `[0, duration)` with no overlap. Silence runs shorter than
//! `min_silence_secs` are folded into the surrounding noise so short rests
//! inside a song do not fragment it.

use crate::models::Segment;
use crate::services::audio_decoder::DecodedAudio;
use crate::services::waveform;
use mastr_common::config::AnalysisConfig;
use serde::Serialize;
use thiserror::Error;

/// Analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Invalid analysis parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Nothing to analyze
    #[error("Audio is empty")]
    EmptyAudio,
}

/// Length and position of an edge silence, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EdgeSilence {
    pub duration: f64,
    pub position: f64,
}

/// Silence and noise segments of one track
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Segmentation {
    pub silences: Vec<Segment>,
    pub noises: Vec<Segment>,
}

impl Segmentation {
    /// Last silence segment, if any
    pub fn last_silence(&self) -> Option<&Segment> {
        self.silences.last()
    }
}

/// Envelope analyzer over one decoded track
pub struct AudioAnalyzer<'a> {
    audio: &'a DecodedAudio,
    config: &'a AnalysisConfig,
    /// Default-window RMS envelope
    envelope: Vec<f32>,
    segmentation: Segmentation,
}

impl<'a> AudioAnalyzer<'a> {
    pub fn new(audio: &'a DecodedAudio, config: &'a AnalysisConfig) -> Result<Self, AnalysisError> {
        if audio.samples.is_empty() || audio.sample_rate == 0 {
            return Err(AnalysisError::EmptyAudio);
        }
        if config.window_ms == 0 {
            return Err(AnalysisError::InvalidParameters(
                "window_ms must be > 0".to_string(),
            ));
        }

        let window_secs = config.window_ms as f64 / 1000.0;
        let envelope = rms_envelope(&audio.samples, window_samples(audio.sample_rate, window_secs));

        let mut analyzer = Self {
            audio,
            config,
            envelope,
            segmentation: Segmentation::default(),
        };
        analyzer.segmentation = analyzer.segment();
        Ok(analyzer)
    }

    /// Track duration in seconds
    pub fn duration(&self) -> f64 {
        self.audio.duration_secs()
    }

    fn window_secs(&self) -> f64 {
        window_samples(self.audio.sample_rate, self.config.window_ms as f64 / 1000.0) as f64
            / self.audio.sample_rate as f64
    }

    /// RMS energy per window of `window_secs`, covering the full track
    ///
    /// The last window may be shorter than the others.
    pub fn envelope(&self, window_secs: f64) -> Vec<f32> {
        rms_envelope(
            &self.audio.samples,
            window_samples(self.audio.sample_rate, window_secs),
        )
    }

    /// Envelope at the configured default window
    pub fn default_envelope(&self) -> &[f32] {
        &self.envelope
    }

    pub fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    pub fn silences(&self) -> &[Segment] {
        &self.segmentation.silences
    }

    pub fn noises(&self) -> &[Segment] {
        &self.segmentation.noises
    }

    /// First silence scanning from the front
    pub fn first_silence(&self) -> Option<EdgeSilence> {
        self.silences().first().map(|s| EdgeSilence {
            duration: s.duration,
            position: s.start,
        })
    }

    /// Last silence scanning backwards from the end
    pub fn end_silence(&self) -> Option<EdgeSilence> {
        self.silences().last().map(|s| EdgeSilence {
            duration: s.duration,
            position: s.start,
        })
    }

    /// Tempo drift across `splits` evenly spaced split points
    ///
    /// One split compares halves, three compare quarters.
    pub fn bpm_change(&self, beats: &[f64], splits: usize, dominant_bpm: f64) -> bool {
        let duration = self.duration();
        let parts = splits + 1;
        let intervals: Vec<(f64, f64)> = (0..parts)
            .map(|i| {
                (
                    duration * i as f64 / parts as f64,
                    duration * (i + 1) as f64 / parts as f64,
                )
            })
            .collect();
        tempo_drift(
            beats,
            &intervals,
            dominant_bpm,
            self.config.bpm_tolerance,
            self.config.min_beats,
        )
    }

    /// Tempo drift measured only inside the non-silent fragments
    pub fn bpm_change_in_fragments(&self, beats: &[f64], dominant_bpm: f64) -> bool {
        let intervals: Vec<(f64, f64)> = self.noises().iter().map(|n| (n.start, n.end)).collect();
        tempo_drift(
            beats,
            &intervals,
            dominant_bpm,
            self.config.bpm_tolerance,
            self.config.min_beats,
        )
    }

    /// Min/max sample per column, for waveform rendering
    pub fn peaks(&self, columns: usize) -> Vec<(f32, f32)> {
        let samples = &self.audio.samples;
        if columns == 0 {
            return Vec::new();
        }
        let per_column = samples.len().div_ceil(columns).max(1);
        samples
            .chunks(per_column)
            .map(|chunk| {
                chunk.iter().fold((f32::MAX, f32::MIN), |(lo, hi), &s| {
                    (lo.min(s), hi.max(s))
                })
            })
            .collect()
    }

    /// Waveform PNG of the whole track
    ///
    /// The label only tags the log line; the image carries no text.
    pub fn plot_wave(&self, label: &str) -> Result<Vec<u8>, image::ImageError> {
        let peaks = self.peaks(waveform::DEFAULT_WIDTH as usize);
        let png = waveform::render_png(&peaks, waveform::DEFAULT_WIDTH, waveform::DEFAULT_HEIGHT)?;
        tracing::debug!(label, bytes = png.len(), "Waveform rendered");
        Ok(png)
    }

    /// Partition the default envelope into silence and noise segments
    fn segment(&self) -> Segmentation {
        let threshold = self.config.silence_threshold;
        let window_secs = self.window_secs();
        let duration = self.duration();
        let min_windows = (self.config.min_silence_secs / window_secs).ceil() as usize;

        // Runs of (silent, first_window, end_window_exclusive)
        let mut runs: Vec<(bool, usize, usize)> = Vec::new();
        for (idx, &rms) in self.envelope.iter().enumerate() {
            let silent = rms < threshold;
            match runs.last_mut() {
                Some((kind, _, end)) if *kind == silent => *end = idx + 1,
                _ => runs.push((silent, idx, idx + 1)),
            }
        }

        // Fold short silences into noise, then merge neighbours of equal kind
        let mut merged: Vec<(bool, usize, usize)> = Vec::with_capacity(runs.len());
        for (silent, start, end) in runs {
            let silent = silent && end - start >= min_windows;
            match merged.last_mut() {
                Some((kind, _, last_end)) if *kind == silent => *last_end = end,
                _ => merged.push((silent, start, end)),
            }
        }

        let run_count = merged.len();
        let mut segmentation = Segmentation::default();
        for (i, (silent, start, end)) in merged.into_iter().enumerate() {
            let is_last_run = i + 1 == run_count;
            let start_secs = (start as f64 * window_secs).min(duration);
            let end_secs = if is_last_run {
                duration
            } else {
                (end as f64 * window_secs).min(duration)
            };
            let segment = Segment::new(start_secs, end_secs, is_last_run);
            if silent {
                segmentation.silences.push(segment);
            } else {
                segmentation.noises.push(segment);
            }
        }

        tracing::debug!(
            silences = segmentation.silences.len(),
            noises = segmentation.noises.len(),
            duration_secs = duration,
            "Segmentation complete"
        );

        segmentation
    }
}

/// Samples per window, at least one
fn window_samples(sample_rate: u32, window_secs: f64) -> usize {
    ((sample_rate as f64 * window_secs).round() as usize).max(1)
}

/// RMS (root mean square) per window
pub fn rms_envelope(samples: &[f32], window_samples: usize) -> Vec<f32> {
    samples
        .chunks(window_samples.max(1))
        .map(calculate_rms)
        .collect()
}

fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Tempo implied by the beats inside `[start, end)`
///
/// Median inter-beat interval, so a few missed or doubled beats do not skew
/// the estimate. `None` when fewer than `min_beats` beats fall inside.
pub fn local_tempo(beats: &[f64], start: f64, end: f64, min_beats: usize) -> Option<f64> {
    let inside: Vec<f64> = beats
        .iter()
        .copied()
        .filter(|&b| b >= start && b < end)
        .collect();
    if inside.len() < min_beats.max(2) {
        return None;
    }

    let mut intervals: Vec<f64> = inside
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&d| d > 0.0)
        .collect();
    if intervals.is_empty() {
        return None;
    }
    intervals.sort_by(|a, b| a.total_cmp(b));

    let mid = intervals.len() / 2;
    let median = if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    };
    Some(60.0 / median)
}

/// Whether any measurable interval deviates from the dominant tempo
///
/// `tolerance` is relative: 0.05 allows ±5% around `dominant_bpm`.
pub fn tempo_drift(
    beats: &[f64],
    intervals: &[(f64, f64)],
    dominant_bpm: f64,
    tolerance: f64,
    min_beats: usize,
) -> bool {
    if dominant_bpm <= 0.0 || !dominant_bpm.is_finite() {
        return false;
    }

    intervals.iter().any(|&(start, end)| {
        match local_tempo(beats, start, end, min_beats) {
            Some(local) => {
                let deviation = (local - dominant_bpm).abs() / dominant_bpm;
                if deviation > tolerance {
                    tracing::debug!(
                        start,
                        end,
                        local_bpm = format!("{:.1}", local),
                        dominant_bpm = format!("{:.1}", dominant_bpm),
                        "Tempo drift detected"
                    );
                }
                deviation > tolerance
            }
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    fn audio(parts: &[(f64, f32)]) -> DecodedAudio {
        let mut samples = Vec::new();
        for &(secs, amplitude) in parts {
            let count = (secs * RATE as f64) as usize;
            samples.extend((0..count).map(|i| {
                let t = i as f32 / RATE as f32;
                amplitude * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
            }));
        }
        DecodedAudio {
            samples,
            sample_rate: RATE,
            channels: 1,
        }
    }

    fn beats(from: f64, to: f64, bpm: f64) -> Vec<f64> {
        let step = 60.0 / bpm;
        let mut out = Vec::new();
        let mut t = from;
        while t < to {
            out.push(t);
            t += step;
        }
        out
    }

    fn assert_partition(seg: &Segmentation, duration: f64) {
        let mut all: Vec<Segment> = seg.silences.iter().chain(seg.noises.iter()).copied().collect();
        all.sort_by(|a, b| a.start.total_cmp(&b.start));
        assert_eq!(all.first().map(|s| s.start), Some(0.0));
        assert_eq!(all.last().map(|s| s.end), Some(duration));
        for pair in all.windows(2) {
            assert!((pair[0].end - pair[1].start).abs() < 1e-9, "gap or overlap: {:?}", pair);
        }
    }

    #[test]
    fn test_rms_calculation() {
        let samples: Vec<f32> = (0..100)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 100.0).sin())
            .collect();

        let rms = calculate_rms(&samples);
        let expected = 1.0 / std::f32::consts::SQRT_2;
        assert!((rms - expected).abs() < 0.01);
    }

    #[test]
    fn test_envelope_covers_track() {
        let audio = audio(&[(1.03, 0.5)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();
        // 1.03s at 50ms windows: 20 full windows plus one partial
        assert_eq!(analyzer.default_envelope().len(), 21);
        assert_eq!(analyzer.envelope(0.1).len(), 11);
    }

    #[test]
    fn test_silence_gap_detected_and_partitioned() {
        let audio = audio(&[(10.0, 0.5), (2.0, 0.0), (10.0, 0.5)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();

        let silences = analyzer.silences();
        assert_eq!(silences.len(), 1);
        assert!((silences[0].start - 10.0).abs() < 0.06);
        assert!((silences[0].end - 12.0).abs() < 0.06);
        assert!(!silences[0].is_final);
        assert_eq!(analyzer.noises().len(), 2);
        assert!(analyzer.noises()[1].is_final);
        assert_partition(analyzer.segmentation(), analyzer.duration());
    }

    #[test]
    fn test_trailing_silence_is_final() {
        let audio = audio(&[(175.0, 0.4), (5.0, 0.0)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();

        let last = analyzer.segmentation().last_silence().copied().unwrap();
        assert!(last.is_final);
        assert!((last.start - 175.0).abs() < 0.06);
        assert_eq!(last.end, analyzer.duration());

        let end = analyzer.end_silence().unwrap();
        assert!((end.duration - 5.0).abs() < 0.06);
        assert_eq!(end.position, last.start);
    }

    #[test]
    fn test_short_silence_folded_into_noise() {
        let audio = audio(&[(5.0, 0.5), (0.2, 0.0), (5.0, 0.5), (1.0, 0.0), (3.0, 0.5)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();

        assert_eq!(analyzer.silences().len(), 1);
        assert!((analyzer.silences()[0].start - 10.2).abs() < 0.06);
        assert_eq!(analyzer.noises().len(), 2);
        assert_partition(analyzer.segmentation(), analyzer.duration());
    }

    #[test]
    fn test_no_silence_single_noise_segment() {
        let audio = audio(&[(90.0, 0.3)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();

        assert!(analyzer.silences().is_empty());
        assert!(analyzer.first_silence().is_none());
        assert!(analyzer.end_silence().is_none());
        assert_eq!(analyzer.noises().len(), 1);
        assert_eq!(analyzer.noises()[0], Segment::new(0.0, analyzer.duration(), true));
    }

    #[test]
    fn test_leading_silence_is_first_silence() {
        let audio = audio(&[(2.0, 0.0), (20.0, 0.5), (3.0, 0.0), (20.0, 0.5)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();

        let first = analyzer.first_silence().unwrap();
        assert_eq!(first.position, 0.0);
        assert!((first.duration - 2.0).abs() < 0.06);
        let end = analyzer.end_silence().unwrap();
        assert!((end.position - 22.0).abs() < 0.06);
    }

    #[test]
    fn test_empty_audio_rejected() {
        let audio = DecodedAudio {
            samples: Vec::new(),
            sample_rate: RATE,
            channels: 1,
        };
        let config = AnalysisConfig::default();
        assert!(matches!(
            AudioAnalyzer::new(&audio, &config),
            Err(AnalysisError::EmptyAudio)
        ));
    }

    #[test]
    fn test_local_tempo_median() {
        let mut series = beats(0.0, 30.0, 120.0);
        // One spurious extra beat barely moves the median
        series.push(10.1);
        series.sort_by(|a, b| a.total_cmp(b));
        let tempo = local_tempo(&series, 0.0, 30.0, 8).unwrap();
        assert!((tempo - 120.0).abs() < 0.5);
        assert!(local_tempo(&series, 0.0, 2.0, 8).is_none());
    }

    #[test]
    fn test_steady_tempo_no_drift() {
        let audio = audio(&[(60.0, 0.5)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();
        let series = beats(0.0, 60.0, 120.0);

        assert!(!analyzer.bpm_change(&series, 1, 120.0));
        assert!(!analyzer.bpm_change(&series, 3, 120.0));
        assert!(!analyzer.bpm_change_in_fragments(&series, 120.0));
    }

    #[test]
    fn test_half_split_detects_second_half_drift() {
        let audio = audio(&[(60.0, 0.5)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();
        let mut series = beats(0.0, 30.0, 120.0);
        series.extend(beats(30.0, 60.0, 140.0));

        assert!(analyzer.bpm_change(&series, 1, 120.0));
        assert!(analyzer.bpm_change(&series, 3, 120.0));
    }

    #[test]
    fn test_quarter_split_catches_localized_drift_halves_miss() {
        let audio = audio(&[(80.0, 0.5)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();
        // Only the last quarter drifts
        let mut series = beats(0.0, 60.0, 120.0);
        series.extend(beats(60.0, 80.0, 150.0));

        assert!(analyzer.bpm_change(&series, 3, 120.0));
    }

    #[test]
    fn test_drift_monotonic_in_magnitude() {
        let intervals = [(0.0, 30.0), (30.0, 60.0)];
        let detect = |second_half_bpm: f64| {
            let mut series = beats(0.0, 30.0, 120.0);
            series.extend(beats(30.0, 60.0, second_half_bpm));
            tempo_drift(&series, &intervals, 120.0, 0.05, 8)
        };

        assert!(!detect(121.0));
        assert!(!detect(124.0));
        assert!(detect(130.0));
        assert!(detect(160.0));
    }

    #[test]
    fn test_fragments_ignore_beats_in_silence() {
        let audio = audio(&[(30.0, 0.5), (10.0, 0.0), (30.0, 0.5)]);
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();
        let mut series = beats(0.0, 30.0, 120.0);
        // Tracker noise during the silent gap
        series.extend(beats(30.0, 40.0, 200.0));
        series.extend(beats(40.0, 70.0, 120.0));

        assert!(!analyzer.bpm_change_in_fragments(&series, 120.0));
    }

    #[test]
    fn test_zero_dominant_never_drifts() {
        let series = beats(0.0, 30.0, 120.0);
        assert!(!tempo_drift(&series, &[(0.0, 30.0)], 0.0, 0.05, 8));
    }

    #[test]
    fn test_peaks_min_max() {
        let audio = DecodedAudio {
            samples: vec![0.1, -0.5, 0.3, 0.9, -0.2, 0.0],
            sample_rate: RATE,
            channels: 1,
        };
        let config = AnalysisConfig::default();
        let analyzer = AudioAnalyzer::new(&audio, &config).unwrap();
        assert_eq!(analyzer.peaks(2), vec![(-0.5, 0.3), (-0.2, 0.9)]);
    }
}
