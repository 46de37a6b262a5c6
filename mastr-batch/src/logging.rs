//! Tracing setup
//!
//! The subscriber goes up before the config file is read, so config
//! discovery and its warnings are logged. The configured level is swapped in
//! afterwards through a reload handle.

use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// Level in effect until the config file has been read
pub const BOOTSTRAP_LEVEL: &str = "info";

/// Filter directives for this workspace's crates at `level`
pub fn directives(level: &str) -> String {
    format!("mastr_batch={0},mastr_common={0}", level)
}

/// Handle for applying the configured level once it is known
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    /// `RUST_LOG` was set and stays authoritative
    from_env: bool,
}

/// Install the global subscriber writing to stderr
pub fn init() -> LogHandle {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(directives(BOOTSTRAP_LEVEL)), false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    LogHandle {
        filter: handle,
        from_env,
    }
}

impl LogHandle {
    /// Switch to the configured level unless `RUST_LOG` chose the filter
    pub fn apply_level(&self, level: &str) {
        if self.from_env || level == BOOTSTRAP_LEVEL {
            return;
        }
        match self.filter.reload(EnvFilter::new(directives(level))) {
            Ok(()) => tracing::debug!(level, "Applied configured log level"),
            Err(e) => tracing::warn!(error = %e, level, "Failed to apply configured log level"),
        }
    }
}
