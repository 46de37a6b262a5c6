//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file. Every section has compiled
//! defaults, so a missing file or a missing table is never fatal: the loader
//! logs a warning and carries on with defaults.
//!
//! Config file discovery order:
//! 1. Explicit path (command-line `--config`)
//! 2. `MASTR_CONFIG` environment variable
//! 3. `~/.config/mastr/config.toml`
//! 4. `/etc/mastr/config.toml` (Linux only)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MASTR_CONFIG";

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "MASTR_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Root folder holding the database, blob directory and scratch space
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub mastering: MasteringConfig,

    #[serde(default)]
    pub flags: FlagsConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

impl TomlConfig {
    /// Validate every section
    ///
    /// Called once at startup; a failure here aborts the run before any job
    /// is touched.
    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate()?;
        self.analysis.validate()?;
        self.mastering.validate()?;
        self.flags.validate()?;
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Dispatcher settings shared by every batch command
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of jobs in flight at once
    pub concurrency: usize,
    /// Jobs fetched per page
    pub page_size: usize,
    /// Stop admitting new jobs after this many (unlimited when absent)
    pub limit: Option<usize>,
    /// Wall-clock budget for the whole run in seconds (unlimited when absent)
    pub timeout_secs: Option<u64>,
    /// Abort once consecutive failures exceed this count
    pub error_threshold: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            page_size: 50,
            limit: None,
            timeout_secs: None,
            error_threshold: 10,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("dispatch.concurrency must be >= 1".to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("dispatch.page_size must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Envelope and tempo analysis settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// RMS window size in milliseconds
    pub window_ms: u32,
    /// RMS level below which a window counts as silence (linear, [-1, 1] scale)
    pub silence_threshold: f32,
    /// Silence runs shorter than this are folded into the surrounding noise
    pub min_silence_secs: f64,
    /// Relative tempo deviation tolerated before a sub-interval counts as drift
    pub bpm_tolerance: f64,
    /// Sub-intervals with fewer beats than this are not measured
    pub min_beats: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_ms: 50,
            silence_threshold: 0.002,
            min_silence_secs: 0.5,
            bpm_tolerance: 0.05,
            min_beats: 8,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(Error::Config("analysis.window_ms must be > 0".to_string()));
        }
        if !(self.silence_threshold > 0.0 && self.silence_threshold < 1.0) {
            return Err(Error::Config(format!(
                "analysis.silence_threshold must be in (0, 1), got {}",
                self.silence_threshold
            )));
        }
        if !(self.min_silence_secs >= 0.0) {
            return Err(Error::Config("analysis.min_silence_secs must be >= 0".to_string()));
        }
        if !(self.bpm_tolerance > 0.0) {
            return Err(Error::Config("analysis.bpm_tolerance must be > 0".to_string()));
        }
        if self.min_beats < 2 {
            return Err(Error::Config("analysis.min_beats must be >= 2".to_string()));
        }
        Ok(())
    }
}

/// Mastering pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MasteringConfig {
    /// Fade-out applied when a natural ending was found and cut
    pub short_fade_out_secs: f64,
    /// Fade-out applied to mask an abrupt ending
    pub long_fade_out_secs: f64,
    /// A last silence ending within this many seconds of the end is cut
    pub cut_tail_window_secs: f64,
    /// Reference loudness handed to the loudness tool
    pub reference_loudness: f64,
    /// Matching level handed to the loudness tool
    pub matching_level: f64,
    /// Ask the loudness tool to preserve bass
    pub bass_preservation: bool,
    /// MP3 bitrate of the mastered output
    pub bitrate_kbps: u32,
}

impl Default for MasteringConfig {
    fn default() -> Self {
        Self {
            short_fade_out_secs: 1.0,
            long_fade_out_secs: 5.0,
            cut_tail_window_secs: 10.0,
            reference_loudness: -9.0,
            matching_level: 1.0,
            bass_preservation: true,
            bitrate_kbps: 320,
        }
    }
}

impl MasteringConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.short_fade_out_secs > 0.0 && self.long_fade_out_secs > 0.0) {
            return Err(Error::Config("mastering fade-out durations must be > 0".to_string()));
        }
        if self.short_fade_out_secs > self.long_fade_out_secs {
            return Err(Error::Config(format!(
                "mastering.short_fade_out_secs ({}) must not exceed mastering.long_fade_out_secs ({})",
                self.short_fade_out_secs, self.long_fade_out_secs
            )));
        }
        if !(self.cut_tail_window_secs >= 0.0) {
            return Err(Error::Config("mastering.cut_tail_window_secs must be >= 0".to_string()));
        }
        if self.bitrate_kbps == 0 {
            return Err(Error::Config("mastering.bitrate_kbps must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Flag classification settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlagsConfig {
    /// Silences ending within this many seconds of the end are not reported
    pub tail_window_secs: f64,
    /// Tracks shorter than this are flagged `short`
    pub short_track_secs: f64,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            tail_window_secs: 5.0,
            short_track_secs: 120.0,
        }
    }
}

impl FlagsConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tail_window_secs >= 0.0 && self.short_track_secs >= 0.0) {
            return Err(Error::Config("flags windows must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// External tool locations
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Loudness normalization binary
    pub loudness: PathBuf,
    /// Audio editor binary (ffmpeg)
    pub ffmpeg: PathBuf,
    /// Beat tracker binary (aubio)
    pub beat_tracker: PathBuf,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            loudness: PathBuf::from("phase_limiter"),
            ffmpeg: PathBuf::from("ffmpeg"),
            beat_tracker: PathBuf::from("aubio"),
            timeout_secs: 600,
        }
    }
}

/// Locate the config file, if any
pub fn find_config_file(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("mastr").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/mastr/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the bootstrap config, falling back to defaults when no file exists
///
/// An explicitly named file that cannot be parsed is an error; a file that is
/// simply absent only produces a warning.
pub fn load_or_default(cli_path: Option<&Path>) -> Result<TomlConfig> {
    match find_config_file(cli_path) {
        Some(path) if path.exists() => {
            let config = load_toml_config(&path)?;
            info!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        Some(path) => {
            warn!(path = %path.display(), "Config file not found, using compiled defaults");
            Ok(TomlConfig::default())
        }
        None => {
            debug!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Root folder resolution
///
/// Priority order:
/// 1. Command-line argument
/// 2. `MASTR_ROOT_FOLDER` environment variable
/// 3. TOML `root_folder`
/// 4. OS-dependent compiled default
pub struct RootFolderResolver<'a> {
    cli_arg: Option<&'a Path>,
    toml: Option<&'a TomlConfig>,
}

impl<'a> RootFolderResolver<'a> {
    pub fn new() -> Self {
        Self {
            cli_arg: None,
            toml: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<&'a Path>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &'a TomlConfig) -> Self {
        self.toml = Some(config);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = self.cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.toml.and_then(|c| c.root_folder.clone()) {
            return path;
        }

        default_root_folder()
    }
}

impl Default for RootFolderResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mastr"))
        .unwrap_or_else(|| PathBuf::from("./mastr_data"))
}

/// Creates the root folder layout and names the files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder and its blob and scratch subdirectories
    pub fn ensure_directory_exists(&self) -> Result<()> {
        for dir in [self.root_folder.clone(), self.blob_dir(), self.scratch_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!(path = %dir.display(), "Created directory");
            }
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("mastr.db")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.root_folder.join("blobs")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root_folder.join("scratch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        TomlConfig::default().validate().unwrap();
    }

    #[test]
    fn test_short_fade_longer_than_long_fade_rejected() {
        let mastering = MasteringConfig {
            short_fade_out_secs: 6.0,
            long_fade_out_secs: 5.0,
            ..Default::default()
        };
        let err = mastering.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("short_fade_out_secs"));
    }

    #[test]
    fn test_equal_fades_accepted() {
        let mastering = MasteringConfig {
            short_fade_out_secs: 3.0,
            long_fade_out_secs: 3.0,
            ..Default::default()
        };
        assert!(mastering.validate().is_ok());
    }

    #[test]
    fn test_nan_values_rejected() {
        let mastering = MasteringConfig {
            short_fade_out_secs: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(mastering.validate(), Err(Error::Config(_))));

        let mastering = MasteringConfig {
            long_fade_out_secs: f64::NAN,
            ..Default::default()
        };
        assert!(mastering.validate().is_err());

        let mastering = MasteringConfig {
            cut_tail_window_secs: f64::NAN,
            ..Default::default()
        };
        assert!(mastering.validate().is_err());

        let analysis = AnalysisConfig {
            bpm_tolerance: f64::NAN,
            ..Default::default()
        };
        assert!(analysis.validate().is_err());

        let flags = FlagsConfig {
            short_track_secs: f64::NAN,
            ..Default::default()
        };
        assert!(flags.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dispatch = DispatchConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(dispatch.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [mastering]
            long_fade_out_secs = 6.0

            [dispatch]
            concurrency = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.mastering.long_fade_out_secs, 6.0);
        assert_eq!(config.mastering.short_fade_out_secs, 1.0);
        assert_eq!(config.dispatch.concurrency, 8);
        assert_eq!(config.dispatch.error_threshold, 10);
        assert_eq!(config.analysis.window_ms, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_initializer_paths() {
        let init = RootFolderInitializer::new(PathBuf::from("/srv/mastr"));
        assert_eq!(init.database_path(), PathBuf::from("/srv/mastr/mastr.db"));
        assert_eq!(init.blob_dir(), PathBuf::from("/srv/mastr/blobs"));
        assert_eq!(init.scratch_dir(), PathBuf::from("/srv/mastr/scratch"));
    }
}
