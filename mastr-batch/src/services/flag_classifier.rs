//! Flag classification
//!
//! Pure mapping from analysis output to the compact anomaly record stored on
//! the job. Wire format:
//!
//! ```text
//! {"silences":[int,...],"no_end":bool,"short":bool,"bpm_2":bool,"bpm_4":bool,"bpm_n":bool}
//! ```
//!
//! Every field is omitted when falsy or empty, and a record with nothing set
//! serializes to the empty string rather than `{}`.

use crate::models::Segment;
use mastr_common::config::FlagsConfig;
use serde::{Deserialize, Serialize};

/// Anomaly flags for one mastered track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    /// Positions of mid-track silences, as integer percentages of the duration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub silences: Vec<u32>,

    /// No natural ending was found during mastering
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_end: bool,

    /// Final duration below the short-track threshold
    #[serde(default, skip_serializing_if = "is_false")]
    pub short: bool,

    /// Tempo drift between halves
    #[serde(default, skip_serializing_if = "is_false")]
    pub bpm_2: bool,

    /// Tempo drift between quarters
    #[serde(default, skip_serializing_if = "is_false")]
    pub bpm_4: bool,

    /// Tempo drift across non-silent fragments
    #[serde(default, skip_serializing_if = "is_false")]
    pub bpm_n: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Flags {
    pub fn is_empty(&self) -> bool {
        *self == Flags::default()
    }

    /// Canonical serialized form, `""` when empty
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        if self.is_empty() {
            return Ok(String::new());
        }
        serde_json::to_string(self)
    }

    /// Parse a stored record; the empty string is the empty record
    pub fn from_wire(value: &str) -> Result<Self, serde_json::Error> {
        if value.trim().is_empty() {
            return Ok(Flags::default());
        }
        serde_json::from_str(value)
    }
}

/// Tempo drift results at the three granularities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TempoDrift {
    pub halves: bool,
    pub quarters: bool,
    pub fragments: bool,
}

/// Map final segments, duration and tempo drift to a flags record
pub fn classify(
    silences: &[Segment],
    duration_secs: f64,
    drift: TempoDrift,
    had_natural_end: bool,
    config: &FlagsConfig,
) -> Flags {
    let silences = if duration_secs > 0.0 {
        silences
            .iter()
            .filter(|s| !s.is_final && s.end < duration_secs - config.tail_window_secs)
            .map(|s| (100.0 * s.midpoint() / duration_secs).round() as u32)
            .collect()
    } else {
        Vec::new()
    };

    Flags {
        silences,
        no_end: !had_natural_end,
        short: duration_secs < config.short_track_secs,
        bpm_2: drift.halves,
        bpm_4: drift.quarters,
        bpm_n: drift.fragments,
    }
}
