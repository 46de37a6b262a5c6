//! Configuration resolution for mastr-batch
//!
//! Settings come from the TOML bootstrap file (or compiled defaults) and are
//! then overridden by command-line flags, whose `env` fallbacks give the
//! environment a say between the two: CLI → ENV → TOML → default.

use clap::Args;
use mastr_common::config::{
    load_or_default, DispatchConfig, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use mastr_common::Result;
use std::path::{Path, PathBuf};
use tracing::info;

/// Dispatch tuning flags shared by the batch commands
#[derive(Args, Debug, Clone, Default)]
pub struct DispatchArgs {
    /// Jobs processed at the same time
    #[arg(long, env = "MASTR_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Jobs fetched per page
    #[arg(long, env = "MASTR_PAGE_SIZE")]
    pub page_size: Option<usize>,

    /// Stop after dispatching this many jobs
    #[arg(long, env = "MASTR_LIMIT")]
    pub limit: Option<usize>,

    /// Wall-clock budget in seconds; the run ends successfully when it runs out
    #[arg(long, env = "MASTR_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Consecutive failures tolerated before the run aborts
    #[arg(long, env = "MASTR_ERROR_THRESHOLD")]
    pub error_threshold: Option<usize>,
}

impl DispatchArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut DispatchConfig) {
        if let Some(v) = self.concurrency {
            config.concurrency = v;
        }
        if let Some(v) = self.page_size {
            config.page_size = v;
        }
        if self.limit.is_some() {
            config.limit = self.limit;
        }
        if self.timeout_secs.is_some() {
            config.timeout_secs = self.timeout_secs;
        }
        if let Some(v) = self.error_threshold {
            config.error_threshold = v;
        }
    }
}

/// Fully resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub settings: TomlConfig,
    pub root_folder: PathBuf,
}

impl BatchConfig {
    /// Load TOML (or defaults), resolve the root folder and validate
    ///
    /// Invalid settings are fatal here, before any job runs.
    pub fn load(config_path: Option<&Path>, root_folder: Option<&Path>) -> Result<Self> {
        let settings = load_or_default(config_path)?;
        let root_folder = RootFolderResolver::new()
            .with_cli_arg(root_folder)
            .with_toml(&settings)
            .resolve();
        let config = Self {
            settings,
            root_folder,
        };
        config.settings.validate()?;
        Ok(config)
    }

    /// Apply dispatch flags and re-validate
    pub fn with_dispatch_args(mut self, args: &DispatchArgs) -> Result<Self> {
        args.apply(&mut self.settings.dispatch);
        self.settings.dispatch.validate()?;
        Ok(self)
    }

    /// Create the root folder layout, returning paths into it
    pub fn initialize(&self) -> Result<RootFolderInitializer> {
        let initializer = RootFolderInitializer::new(self.root_folder.clone());
        initializer.ensure_directory_exists()?;
        std::fs::create_dir_all(initializer.blob_dir())?;
        std::fs::create_dir_all(initializer.scratch_dir())?;
        info!(root_folder = %self.root_folder.display(), "Root folder ready");
        Ok(initializer)
    }
}
