//! WAV fixture generator
//!
//! Tracks are described as a list of parts, each either a 440Hz tone or
//! digital silence. 8kHz mono keeps multi-minute fixtures small and fast.

use std::path::{Path, PathBuf};

pub const FIXTURE_SAMPLE_RATE: u32 = 8000;

/// One stretch of a generated track
#[derive(Debug, Clone, Copy)]
pub enum Part {
    Tone(f64),
    Silence(f64),
}

/// Write a 16-bit mono WAV made of `parts`
pub fn generate_track(path: &Path, parts: &[Part]) -> anyhow::Result<PathBuf> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FIXTURE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    let mut index = 0usize;
    for part in parts {
        let (secs, audible) = match *part {
            Part::Tone(secs) => (secs, true),
            Part::Silence(secs) => (secs, false),
        };
        let count = (secs * FIXTURE_SAMPLE_RATE as f64).round() as usize;
        for _ in 0..count {
            let sample = if audible {
                let t = index as f32 / FIXTURE_SAMPLE_RATE as f32;
                (0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * i16::MAX as f32) as i16
            } else {
                0
            };
            writer.write_sample(sample)?;
            index += 1;
        }
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// Duration of a WAV file in seconds
pub fn wav_duration(path: &Path) -> anyhow::Result<f64> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

