//! Generic job dispatch
//!
//! One engine runs every batch command. A command supplies a [`JobSource`]
//! (ordered pages plus a filter), a [`Worker`] (the per-job body), and the
//! worker persists through a [`ResultSink`]. The [`Dispatcher`] owns
//! pagination, admission, the failure breaker, and the run's deadline.

pub mod dispatcher;
pub mod locks;

pub use dispatcher::{Dispatcher, RunOptions, RunSummary};
pub use locks::{LockGuard, NamedLock, ResourceLocks};

use crate::error::BatchResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Something the dispatcher can page through by identifier
pub trait Dispatchable: Send + 'static {
    /// Sortable identifier used as the pagination cursor
    fn cursor_key(&self) -> &str;
}

/// Ordered pages of pending work
#[async_trait]
pub trait JobSource<J: Dispatchable>: Send + Sync {
    type Filter: Send + Sync;

    /// Up to `page_size` jobs matching `filter` with id strictly greater than
    /// `after`, ascending by id. An empty page means the source is exhausted.
    async fn next_page(
        &self,
        after: Option<&str>,
        page_size: usize,
        filter: &Self::Filter,
    ) -> BatchResult<Vec<J>>;
}

/// Persistence for processed jobs
///
/// `save` is a full overwrite by id with no version check: when two writers
/// race on the same id, the last save wins.
#[async_trait]
pub trait ResultSink<J>: Send + Sync {
    /// Latest stored copy of a job
    async fn fetch(&self, id: &str) -> BatchResult<Option<J>>;

    async fn save(&self, job: &J) -> BatchResult<()>;
}

/// Per-job body run by the dispatcher
#[async_trait]
pub trait Worker<J: Dispatchable>: Send + Sync + 'static {
    async fn process(&self, job: J, ctx: &JobContext) -> BatchResult<()>;
}

/// Execution context handed to every worker of a run
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Fires on parent cancellation; reaches subprocesses and HTTP calls
    pub cancel: CancellationToken,
    pub locks: ResourceLocks,
}

impl JobContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            locks: ResourceLocks::new(),
        }
    }
}

impl Dispatchable for crate::models::Job {
    fn cursor_key(&self) -> &str {
        &self.id
    }
}
