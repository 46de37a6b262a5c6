//! Audio and storage services used by the batch commands

pub mod audio_analyzer;
pub mod audio_decoder;
pub mod blob_store;
pub mod flag_classifier;
pub mod mastering;
pub mod media_fetcher;
pub mod waveform;

pub use audio_analyzer::{AnalysisError, AudioAnalyzer, EdgeSilence, Segmentation};
pub use audio_decoder::{AudioSource, DecodeError, DecodedAudio};
pub use blob_store::{BlobStore, LocalBlobStore};
pub use flag_classifier::{classify, Flags, TempoDrift};
pub use mastering::{MasterOutcome, MasteringPipeline};
pub use media_fetcher::MediaFetcher;
