//! Human-readable track time formatting
//!
//! Used in log lines and diagnostic reports, where `175.0` reads worse than
//! `2:55.0`.

/// Tracks below this many seconds print as `X.XXs`
const SHORT_FORMAT_MAX: f64 = 100.0;

/// Tracks below this many seconds print as `M:SS.S`
const MEDIUM_FORMAT_MAX: f64 = 6000.0;

/// Format a position or duration in seconds
///
/// ```
/// use mastr_common::human_time::format_track_time;
///
/// assert_eq!(format_track_time(45.0), "45.00s");
/// assert_eq!(format_track_time(175.0), "2:55.0");
/// assert_eq!(format_track_time(7200.0), "2:00:00");
/// ```
pub fn format_track_time(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "n/a".to_string();
    }

    let is_negative = seconds < 0.0;
    let abs_seconds = seconds.abs();

    let formatted = if abs_seconds < SHORT_FORMAT_MAX {
        format!("{:.2}s", abs_seconds)
    } else if abs_seconds < MEDIUM_FORMAT_MAX {
        let minutes = (abs_seconds / 60.0).floor();
        let secs = abs_seconds - minutes * 60.0;
        format!("{}:{:04.1}", minutes as i64, secs)
    } else {
        let whole = abs_seconds.round() as i64;
        format!("{}:{:02}:{:02}", whole / 3600, (whole % 3600) / 60, whole % 60)
    };

    if is_negative {
        format!("-{}", formatted)
    } else {
        formatted
    }
}

/// Format an optional value, printing `null` for `None`
pub fn format_track_time_opt(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) => format_track_time(s),
        None => "null".to_string(),
    }
}
