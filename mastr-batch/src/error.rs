//! Error types for mastr-batch
//!
//! Errors fall into three classes:
//! - **Transient**: tool timeouts, network failures, cancellation. Not retried
//!   within the job; the job stays pending and a later run picks it up.
//! - **Permanent per-job**: undecodable audio, a job missing its source.
//!   Logged with the job id; the job stays unprocessed for manual follow-up.
//! - **Fatal**: breaker tripped, invalid configuration. Aborts the run.
//!
//! Both transient and permanent errors count toward the dispatcher's
//! consecutive-failure breaker.

use crate::services::audio_analyzer::AnalysisError;
use crate::services::audio_decoder::DecodeError;
use crate::tools::ToolError;
use thiserror::Error;

/// Batch pipeline error
#[derive(Debug, Error)]
pub enum BatchError {
    /// First page of the job source was empty
    #[error("No jobs available")]
    NoJobsAvailable,

    /// Consecutive failures exceeded the configured threshold
    #[error("Aborting after {failures} consecutive failures, last error: {last}")]
    BreakerTripped {
        failures: usize,
        last: Box<BatchError>,
    },

    /// Cancellation signal observed
    #[error("Cancelled")]
    Cancelled,

    /// Worker task panicked
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    /// Audio could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Envelope or tempo analysis failed
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// External tool failed
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Job has no usable reference to its source media
    #[error("Job {0} has no source media")]
    MissingSource(String),

    /// Blob store rejected a reference
    #[error("Blob error: {0}")]
    Blob(String),

    /// HTTP transfer failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Waveform rendering failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// mastr-common error (database, config)
    #[error(transparent)]
    Common(#[from] mastr_common::Error),
}

impl BatchError {
    /// Whether a later run could plausibly succeed without intervention
    pub fn is_transient(&self) -> bool {
        match self {
            BatchError::Cancelled | BatchError::Http(_) | BatchError::HttpStatus { .. } => true,
            BatchError::Tool(e) => e.is_transient(),
            BatchError::Common(mastr_common::Error::Database(_)) => true,
            _ => false,
        }
    }

    /// Whether the whole run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BatchError::BreakerTripped { .. } | BatchError::Common(mastr_common::Error::Config(_))
        )
    }
}

impl From<sqlx::Error> for BatchError {
    fn from(err: sqlx::Error) -> Self {
        BatchError::Common(mastr_common::Error::Database(err))
    }
}

/// Result type for batch operations
pub type BatchResult<T> = Result<T, BatchError>;
