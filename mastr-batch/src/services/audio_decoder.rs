//! Audio decoding
//!
//! Decodes a compressed asset (local file or remote URL) to mono f32 PCM in
//! [-1.0, 1.0] using symphonia. Stereo sources are folded to mono by
//! averaging the channel pair; layouts wider than stereo are rejected.

use crate::error::{BatchError, BatchResult};
use crate::services::media_fetcher::url_extension;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Source could not be opened
    #[error("Failed to open audio source {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Container format not recognised or corrupt
    #[error("Malformed audio: {0}")]
    Malformed(String),

    /// No decodable audio track in the container
    #[error("No audio track found")]
    NoTrack,

    /// Mono and stereo only
    #[error("Unsupported channel layout: {0} channels")]
    UnsupportedChannels(usize),

    /// Container held no samples
    #[error("Audio stream is empty")]
    Empty,
}

/// Where the encoded audio lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    Local(PathBuf),
    Remote(String),
}

impl AudioSource {
    /// Interpret a string as URL when it carries an http(s) scheme
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            AudioSource::Remote(location.to_string())
        } else {
            AudioSource::Local(PathBuf::from(location))
        }
    }

    fn extension(&self) -> Option<String> {
        match self {
            AudioSource::Local(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_string),
            AudioSource::Remote(url) => url_extension(url),
        }
    }
}

/// Decoded audio result
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono audio samples (f32, range [-1.0, 1.0])
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Original channel count
    pub channels: usize,
}

impl DecodedAudio {
    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a local file or remote URL
///
/// Remote sources are fetched fully before decoding. Decoding itself is CPU
/// bound and runs on the blocking pool.
pub async fn decode(
    source: &AudioSource,
    client: &reqwest::Client,
    cancel: &CancellationToken,
) -> BatchResult<DecodedAudio> {
    match source {
        AudioSource::Local(path) => decode_local(path).await,
        AudioSource::Remote(url) => {
            tracing::debug!(url = %url, "Fetching remote audio for decode");
            let request = async {
                let response = client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(BatchError::HttpStatus {
                        status: status.as_u16(),
                        url: url.clone(),
                    });
                }
                Ok(response.bytes().await?)
            };
            let bytes = tokio::select! {
                _ = cancel.cancelled() => return Err(BatchError::Cancelled),
                bytes = request => bytes?,
            };
            let hint = source.extension();
            run_blocking(move || decode_bytes(bytes.to_vec(), hint.as_deref())).await
        }
    }
}

/// Decode a local file on the blocking pool
pub async fn decode_local(path: &Path) -> BatchResult<DecodedAudio> {
    let path = path.to_path_buf();
    run_blocking(move || decode_file(&path)).await
}

async fn run_blocking<F>(f: F) -> BatchResult<DecodedAudio>
where
    F: FnOnce() -> Result<DecodedAudio, DecodeError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BatchError::WorkerPanicked(format!("decode task: {}", e)))?
        .map_err(BatchError::from)
}

/// Decode an audio file to mono f32 PCM
pub fn decode_file(file_path: &Path) -> Result<DecodedAudio, DecodeError> {
    tracing::debug!(path = %file_path.display(), "Decoding audio file");

    let file = std::fs::File::open(file_path).map_err(|source| DecodeError::Open {
        path: file_path.display().to_string(),
        source,
    })?;
    let extension = file_path.extension().and_then(|e| e.to_str());
    decode_stream(Box::new(file), extension)
}

/// Decode an in-memory encoded asset to mono f32 PCM
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio, DecodeError> {
    decode_stream(Box::new(Cursor::new(bytes)), extension)
}

fn decode_stream(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> Result<DecodedAudio, DecodeError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Malformed(format!("probe failed: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channel_count = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);
    if channel_count > 2 {
        return Err(DecodeError::UnsupportedChannels(channel_count));
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Malformed(format!("no decoder: {}", e)))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Malformed(format!("packet read: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt frame is not fatal; skip it like a player would
            Err(SymphoniaError::DecodeError(e)) => {
                skipped_packets += 1;
                tracing::trace!(error = %e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(DecodeError::Malformed(format!("decode: {}", e))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if channels == 0 || channels > 2 {
            return Err(DecodeError::UnsupportedChannels(channels));
        }
        channel_count = channels;
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }

        let needs_alloc = sample_buf
            .as_ref()
            .map_or(true, |buf| buf.capacity() < decoded.capacity() * channels);
        if needs_alloc {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            fold_to_mono(buf.samples(), channels, &mut mono);
        }
    }

    if skipped_packets > 0 {
        tracing::warn!(skipped_packets, "Skipped undecodable packets");
    }

    if mono.is_empty() || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    tracing::debug!(
        total_samples = mono.len(),
        sample_rate,
        channels = channel_count,
        duration_seconds = format!("{:.2}", mono.len() as f64 / sample_rate as f64),
        "Audio decoding complete"
    );

    Ok(DecodedAudio {
        samples: mono,
        sample_rate,
        channels: channel_count,
    })
}

/// Append interleaved samples to `out` as mono
fn fold_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_audio_file_not_found() {
        let result = decode_file(Path::new("/nonexistent/file.mp3"));
        assert!(matches!(result, Err(DecodeError::Open { .. })));
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        let result = decode_bytes(vec![0x42; 4096], Some("mp3"));
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_fold_stereo_averages_pairs() {
        let mut out = Vec::new();
        fold_to_mono(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_source_parse_and_extension() {
        let remote = AudioSource::parse("https://cdn.example/tracks/a1.mp3?sig=abc");
        assert!(matches!(remote, AudioSource::Remote(_)));
        assert_eq!(remote.extension().as_deref(), Some("mp3"));

        let local = AudioSource::parse("/tmp/track.wav");
        assert_eq!(local, AudioSource::Local(PathBuf::from("/tmp/track.wav")));
        assert_eq!(local.extension().as_deref(), Some("wav"));
    }
}
