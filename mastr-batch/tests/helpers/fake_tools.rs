//! Scripted stand-ins for the external tools
//!
//! They work on WAV content throughout: the "MP3" files the pipeline names
//! are WAVs with an .mp3 extension, which the decoder identifies by content.
//! Every call is recorded for assertions.

use async_trait::async_trait;
use mastr_batch::tools::{AudioEditor, BeatTracker, LoudnessTool, ToolError, Toolbox};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Recorded editor and tool calls
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Normalize,
    Encode { bitrate_kbps: u32 },
    Cut { at_secs: f64 },
    Fade { track_secs: f64, fade_secs: f64 },
}

pub type CallLog = Arc<Mutex<Vec<ToolCall>>>;

/// Copies its input
pub struct CopyLoudness {
    pub calls: CallLog,
    pub fail: bool,
}

#[async_trait]
impl LoudnessTool for CopyLoudness {
    async fn normalize(
        &self,
        input: &Path,
        output_wav: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(ToolCall::Normalize);
        if self.fail {
            return Err(ToolError::Failed {
                tool: "phase_limiter".to_string(),
                code: Some(1),
                stderr: "scripted failure".to_string(),
            });
        }
        tokio::fs::copy(input, output_wav).await?;
        Ok(())
    }
}

/// Edits WAV content with hound
pub struct WavEditor {
    pub calls: CallLog,
}

fn rewrite_wav(path: &Path, edit: impl FnOnce(&mut Vec<i16>, u32)) -> Result<(), ToolError> {
    let output = |e: hound::Error| ToolError::Output {
        tool: "ffmpeg".to_string(),
        message: e.to_string(),
    };
    let mut reader = hound::WavReader::open(path).map_err(output)?;
    let spec = reader.spec();
    let mut samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .map_err(output)?;
    drop(reader);

    edit(&mut samples, spec.sample_rate);

    let temp = path.with_extension("edit.tmp");
    let mut writer = hound::WavWriter::create(&temp, spec).map_err(output)?;
    for s in samples {
        writer.write_sample(s).map_err(output)?;
    }
    writer.finalize().map_err(output)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

#[async_trait]
impl AudioEditor for WavEditor {
    async fn encode_mp3(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        _cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(ToolCall::Encode { bitrate_kbps });
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn cut(&self, path: &Path, at_secs: f64, _cancel: &CancellationToken) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(ToolCall::Cut { at_secs });
        rewrite_wav(path, |samples, rate| {
            let keep = (at_secs * rate as f64).round() as usize;
            samples.truncate(keep);
        })
    }

    async fn fade_out(
        &self,
        path: &Path,
        track_secs: f64,
        fade_secs: f64,
        _bitrate_kbps: u32,
        _cancel: &CancellationToken,
    ) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(ToolCall::Fade {
            track_secs,
            fade_secs,
        });
        rewrite_wav(path, |samples, rate| {
            let total = samples.len();
            let fade = ((fade_secs * rate as f64).round() as usize).min(total);
            let start = total - fade;
            for (i, s) in samples[start..].iter_mut().enumerate() {
                let gain = 1.0 - (i as f64 + 1.0) / fade as f64;
                *s = (*s as f64 * gain) as i16;
            }
        })
    }
}

/// Beats at a fixed interval, optionally changing interval halfway
pub struct ScriptedBeats {
    pub first_interval: f64,
    pub second_interval: f64,
    pub tempo_bpm: f64,
}

impl ScriptedBeats {
    pub fn steady(bpm: f64) -> Self {
        let interval = 60.0 / bpm;
        Self {
            first_interval: interval,
            second_interval: interval,
            tempo_bpm: bpm,
        }
    }

    pub fn beats_for(&self, duration: f64) -> Vec<f64> {
        let mut beats = Vec::new();
        let mut t = self.first_interval / 2.0;
        while t < duration {
            beats.push(t);
            t += if t < duration / 2.0 {
                self.first_interval
            } else {
                self.second_interval
            };
        }
        beats
    }
}

#[async_trait]
impl BeatTracker for ScriptedBeats {
    async fn beats(&self, path: &Path, _cancel: &CancellationToken) -> Result<Vec<f64>, ToolError> {
        let duration = super::audio_generator::wav_duration(path).map_err(|e| ToolError::Output {
            tool: "aubio".to_string(),
            message: e.to_string(),
        })?;
        Ok(self.beats_for(duration))
    }

    async fn tempo(&self, _path: &Path, _cancel: &CancellationToken) -> Result<f64, ToolError> {
        Ok(self.tempo_bpm)
    }
}

/// Fake toolbox plus the shared call log
pub fn fake_toolbox(beats: ScriptedBeats) -> (Toolbox, CallLog) {
    fake_toolbox_with(beats, false)
}

pub fn fake_toolbox_with(beats: ScriptedBeats, loudness_fails: bool) -> (Toolbox, CallLog) {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let toolbox = Toolbox {
        loudness: Arc::new(CopyLoudness {
            calls: calls.clone(),
            fail: loudness_fails,
        }),
        editor: Arc::new(WavEditor {
            calls: calls.clone(),
        }),
        beats: Arc::new(beats),
    };
    (toolbox, calls)
}

/// Calls recorded so far
pub fn recorded(calls: &CallLog) -> Vec<ToolCall> {
    calls.lock().unwrap().clone()
}
