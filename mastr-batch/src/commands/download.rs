//! `download`: fetch remote sources into the blob store

use super::{cleanup_workdir, App};
use crate::dispatch::{JobContext, ResultSink, RunSummary, Worker};
use crate::error::{BatchError, BatchResult};
use crate::models::{Job, JobFilter};
use crate::services::{BlobStore, MediaFetcher};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Downloads one job's source and records its blob reference
pub struct DownloadWorker {
    sink: Arc<dyn ResultSink<Job>>,
    blobs: Arc<dyn BlobStore>,
    fetcher: MediaFetcher,
    scratch_dir: PathBuf,
}

impl DownloadWorker {
    pub fn new(
        sink: Arc<dyn ResultSink<Job>>,
        blobs: Arc<dyn BlobStore>,
        fetcher: MediaFetcher,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            sink,
            blobs,
            fetcher,
            scratch_dir,
        }
    }

    async fn download(&self, job: &Job, workdir: &std::path::Path, ctx: &JobContext) -> BatchResult<()> {
        let url = job
            .source_url
            .as_deref()
            .ok_or_else(|| BatchError::MissingSource(job.id.clone()))?;

        let local = self.fetcher.fetch_to(url, workdir, "source", &ctx.cancel).await?;

        let source_ref = {
            let _guard = ctx.locks.upload.acquire(&ctx.cancel).await?;
            self.blobs.set(&local).await?
        };

        let mut latest = self.sink.fetch(&job.id).await?.unwrap_or_else(|| job.clone());
        latest.source_ref = Some(source_ref);
        self.sink.save(&latest).await
    }
}

#[async_trait]
impl Worker<Job> for DownloadWorker {
    async fn process(&self, job: Job, ctx: &JobContext) -> BatchResult<()> {
        let workdir = self.scratch_dir.join(format!("download-{}", job.id));
        let result = self.download(&job, &workdir, ctx).await;
        cleanup_workdir(&workdir).await;
        result
    }
}

/// Run the `download` command
pub async fn run(app: &App, cancel: CancellationToken) -> BatchResult<RunSummary> {
    let worker = Arc::new(DownloadWorker::new(
        app.store.clone(),
        app.blobs.clone(),
        app.fetcher.clone(),
        app.scratch_dir.clone(),
    ));
    app.dispatch(JobFilter::NeedsDownload, worker, cancel).await
}
