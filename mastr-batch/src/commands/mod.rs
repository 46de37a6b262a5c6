//! Batch commands
//!
//! Every dispatching command is the same [`Dispatcher`] run with a different
//! filter and worker. [`App`] wires the shared collaborators once per
//! invocation.
//!
//! [`Dispatcher`]: crate::dispatch::Dispatcher

pub mod analyze;
pub mod download;
pub mod process;

use crate::config::BatchConfig;
use crate::db::{init_database_pool, SqliteJobStore};
use crate::dispatch::{Dispatcher, JobContext, RunOptions, RunSummary, Worker};
use crate::error::BatchResult;
use crate::models::{Job, JobFilter};
use crate::services::{LocalBlobStore, MediaFetcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Collaborators shared by the commands of one invocation
pub struct App {
    pub config: BatchConfig,
    pub store: Arc<SqliteJobStore>,
    pub blobs: Arc<LocalBlobStore>,
    pub fetcher: MediaFetcher,
    pub scratch_dir: PathBuf,
}

impl App {
    /// Prepare the root folder, open the database and the blob store
    pub async fn open(config: BatchConfig) -> BatchResult<Self> {
        let layout = config.initialize()?;
        let pool = init_database_pool(&layout.database_path()).await?;
        let fetcher = MediaFetcher::new(Duration::from_secs(config.settings.tools.timeout_secs))?;

        tracing::info!(
            database = %layout.database_path().display(),
            blobs = %layout.blob_dir().display(),
            "Job store opened"
        );

        Ok(Self {
            store: Arc::new(SqliteJobStore::new(pool)),
            blobs: Arc::new(LocalBlobStore::new(layout.blob_dir())),
            fetcher,
            scratch_dir: layout.scratch_dir(),
            config,
        })
    }

    /// Run `worker` over the store's jobs matching `filter`
    pub async fn dispatch<W: Worker<Job>>(
        &self,
        filter: JobFilter,
        worker: Arc<W>,
        cancel: CancellationToken,
    ) -> BatchResult<RunSummary> {
        let options = RunOptions::from(&self.config.settings.dispatch);
        let dispatcher = Dispatcher::new(options, JobContext::new(cancel));
        tracing::info!(filter = ?filter, "Dispatching jobs");
        dispatcher.run(self.store.as_ref(), &filter, worker).await
    }
}

/// Remove a job's scratch directory, logging rather than failing
pub(crate) async fn cleanup_workdir(workdir: &std::path::Path) {
    match tokio::fs::remove_dir_all(workdir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %workdir.display(), error = %e, "Failed to remove scratch directory"),
    }
}
