//! Job record
//!
//! The job store owns these records. Workers follow a fetch-latest, mutate,
//! save cycle with no version column, so two workers touching the same id
//! race and the last save wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One track moving through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Lexicographically sortable, monotonically assigned identifier
    pub id: String,
    /// Remote location of the raw track, as delivered by the generator
    pub source_url: Option<String>,
    /// Blob reference of the downloaded raw track
    pub source_ref: Option<String>,
    /// Set once mastering completed and results were saved
    pub processed: bool,
    /// Blob reference of the mastered MP3
    pub master_ref: Option<String>,
    /// Blob reference of the rendered waveform PNG
    pub wave_ref: Option<String>,
    /// Final mastered duration in seconds
    pub duration_secs: f64,
    /// Dominant tempo in BPM
    pub tempo_bpm: f64,
    /// Serialized flags record, empty string when nothing was flagged
    pub flags: String,
    /// `!flags.is_empty()`
    pub flagged: bool,
    /// A terminal silence was found and the track was cut there
    pub ends_naturally: bool,
    /// Last save time, maintained by the store
    pub updated_at: Option<DateTime<Utc>>,
}

impl Job {
    /// New unprocessed job pointing at remote source media
    pub fn new(id: impl Into<String>, source_url: Option<String>) -> Self {
        Self {
            id: id.into(),
            source_url,
            source_ref: None,
            processed: false,
            master_ref: None,
            wave_ref: None,
            duration_secs: 0.0,
            tempo_bpm: 0.0,
            flags: String::new(),
            flagged: false,
            ends_naturally: false,
            updated_at: None,
        }
    }

    /// Fresh identifier that sorts after ids generated in earlier microseconds
    ///
    /// Microsecond UTC timestamp plus a random suffix that keeps ids minted
    /// within the same microsecond distinct.
    pub fn generate_id() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S%6f"), &suffix[..8])
    }

    /// Whether the job can be fed to the mastering pipeline
    pub fn has_source(&self) -> bool {
        self.source_ref.is_some() || self.source_url.is_some()
    }
}

/// Caller-supplied predicate for job paging
///
/// Each variant has an in-memory form (`matches`) and a SQL form
/// (`sql_clause`) so every store applies the same selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFilter {
    /// Every job
    All,
    /// Remote source present, not yet stored as a blob
    NeedsDownload,
    /// Has a source and has not been processed
    Unprocessed,
    /// Has a source, processed or not
    Reprocess,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        match self {
            JobFilter::All => true,
            JobFilter::NeedsDownload => job.source_url.is_some() && job.source_ref.is_none(),
            JobFilter::Unprocessed => job.has_source() && !job.processed,
            JobFilter::Reprocess => job.has_source(),
        }
    }

    /// SQL boolean expression over the `jobs` table columns
    pub fn sql_clause(&self) -> &'static str {
        match self {
            JobFilter::All => "1 = 1",
            JobFilter::NeedsDownload => "source_url IS NOT NULL AND source_ref IS NULL",
            JobFilter::Unprocessed => {
                "(source_ref IS NOT NULL OR source_url IS NOT NULL) AND processed = 0"
            }
            JobFilter::Reprocess => "(source_ref IS NOT NULL OR source_url IS NOT NULL)",
        }
    }
}
