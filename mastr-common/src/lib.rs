//! # mastr common library
//!
//! Shared code for the mastr batch tooling:
//! - Common error type
//! - TOML bootstrap configuration and root folder resolution
//! - Human-readable track time formatting

pub mod config;
pub mod error;
pub mod human_time;

pub use error::{Error, Result};
