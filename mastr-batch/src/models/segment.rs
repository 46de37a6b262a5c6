//! Silence and noise segments
//!
//! Segments are derived per job and never persisted.

use serde::{Deserialize, Serialize};

/// Contiguous time range of silence or noise, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start time in seconds (inclusive)
    pub start: f64,
    /// End time in seconds (exclusive)
    pub end: f64,
    /// `end - start`
    pub duration: f64,
    /// Last segment of its kind and touches the very end of the track
    pub is_final: bool,
}

impl Segment {
    pub fn new(start: f64, end: f64, is_final: bool) -> Self {
        Self {
            start,
            end,
            duration: end - start,
            is_final,
        }
    }

    /// Center of the segment in seconds
    pub fn midpoint(&self) -> f64 {
        self.start + self.duration / 2.0
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_and_midpoint() {
        let segment = Segment::new(175.0, 180.0, true);
        assert_eq!(segment.duration, 5.0);
        assert_eq!(segment.midpoint(), 177.5);
        assert!(segment.contains(175.0));
        assert!(!segment.contains(180.0));
    }
}
