//! mastr-batch library interface
//!
//! Batch mastering of generated tracks: a generic bounded-concurrency
//! dispatcher drives per-command workers over a SQLite job store. The
//! process worker masters each track through external tools, analyzes the
//! result, classifies anomalies and stores the outcome.

pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod tools;

pub use crate::error::{BatchError, BatchResult};

/// Build identification captured by the build script
pub mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const GIT_HASH: &str = env!("GIT_HASH");
    pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
    pub const BUILD_PROFILE: &str = env!("BUILD_PROFILE");
}
