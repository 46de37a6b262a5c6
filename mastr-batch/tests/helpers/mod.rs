//! Test helpers shared by the mastr-batch integration tests
#![allow(dead_code)]

pub mod audio_generator;
pub mod fake_tools;
pub mod log_capture;
pub mod media_server;
pub mod memory_store;

pub use audio_generator::{generate_track, wav_duration, Part, FIXTURE_SAMPLE_RATE};
pub use fake_tools::{fake_toolbox, fake_toolbox_with, recorded, ScriptedBeats, ToolCall};
pub use log_capture::LogCapture;
pub use media_server::MediaServer;
pub use memory_store::MemoryJobStore;
