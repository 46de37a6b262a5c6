//! Data models for mastr-batch
//!
//! - `Job`: the externally owned job record the workers read and write
//! - `Segment`: transient silence/noise region derived during analysis

pub mod job;
pub mod segment;

pub use job::{Job, JobFilter};
pub use segment::Segment;
