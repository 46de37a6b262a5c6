//! `process` (alias `master`): master, analyze, flag and store each track

use super::{cleanup_workdir, App};
use crate::dispatch::{JobContext, ResultSink, RunSummary, Worker};
use crate::error::{BatchError, BatchResult};
use crate::models::{Job, JobFilter};
use crate::services::audio_decoder::decode_local;
use crate::services::{BlobStore, MasterOutcome, MasteringPipeline, MediaFetcher};
use crate::tools::Toolbox;
use async_trait::async_trait;
use mastr_common::config::FlagsConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which jobs a `process` run picks up
pub fn filter(reprocess: bool) -> JobFilter {
    if reprocess {
        JobFilter::Reprocess
    } else {
        JobFilter::Unprocessed
    }
}

/// Full per-track processing
pub struct ProcessWorker {
    pipeline: Arc<MasteringPipeline>,
    sink: Arc<dyn ResultSink<Job>>,
    blobs: Arc<dyn BlobStore>,
    fetcher: MediaFetcher,
    scratch_dir: PathBuf,
    flags: FlagsConfig,
}

impl ProcessWorker {
    pub fn new(
        pipeline: Arc<MasteringPipeline>,
        sink: Arc<dyn ResultSink<Job>>,
        blobs: Arc<dyn BlobStore>,
        fetcher: MediaFetcher,
        scratch_dir: PathBuf,
        flags: FlagsConfig,
    ) -> Self {
        Self {
            pipeline,
            sink,
            blobs,
            fetcher,
            scratch_dir,
            flags,
        }
    }

    /// Local copy of the job's raw track: stored blob first, remote URL second
    async fn fetch_source(&self, job: &Job, workdir: &Path, ctx: &JobContext) -> BatchResult<PathBuf> {
        if let Some(source_ref) = job.source_ref.as_deref() {
            let name = match Path::new(source_ref).extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("source.{}", ext),
                None => "source".to_string(),
            };
            let local = workdir.join(name);
            self.blobs.download(source_ref, &local).await?;
            return Ok(local);
        }
        if let Some(url) = job.source_url.as_deref() {
            return self.fetcher.fetch_to(url, workdir, "source", &ctx.cancel).await;
        }
        Err(BatchError::MissingSource(job.id.clone()))
    }

    async fn run(&self, job: &Job, workdir: &Path, ctx: &JobContext) -> BatchResult<()> {
        tokio::fs::create_dir_all(workdir).await?;
        let source = self.fetch_source(job, workdir, ctx).await?;

        // Undecodable sources fail here, before the loudness tool is queued
        let raw = decode_local(&source).await?;
        tracing::debug!(
            job_id = %job.id,
            raw_duration_secs = raw.duration_secs(),
            sample_rate = raw.sample_rate,
            "Source decoded"
        );
        drop(raw);

        let outcome = self.pipeline.master(&source, workdir, ctx).await?;
        let flags = outcome.flags(&self.flags).to_wire()?;

        let wave_path = workdir.join("wave.png");
        tokio::fs::write(&wave_path, &outcome.waveform_png).await?;

        let (master_ref, wave_ref) = {
            let _guard = ctx.locks.upload.acquire(&ctx.cancel).await?;
            let master_ref = self.blobs.set(&outcome.path).await?;
            let wave_ref = self.blobs.set(&wave_path).await?;
            (master_ref, wave_ref)
        };

        // Fetch latest, mutate, save: no version check, last save wins
        let mut latest = self.sink.fetch(&job.id).await?.unwrap_or_else(|| job.clone());
        apply_outcome(&mut latest, &outcome, flags, master_ref, wave_ref);
        self.sink.save(&latest).await?;

        tracing::info!(
            job_id = %job.id,
            duration_secs = latest.duration_secs,
            flagged = latest.flagged,
            flags = %latest.flags,
            "Job processed"
        );
        Ok(())
    }
}

fn apply_outcome(job: &mut Job, outcome: &MasterOutcome, flags: String, master_ref: String, wave_ref: String) {
    job.processed = true;
    job.master_ref = Some(master_ref);
    job.wave_ref = Some(wave_ref);
    job.duration_secs = outcome.duration_secs;
    job.tempo_bpm = outcome.tempo_bpm;
    job.ends_naturally = outcome.natural_end;
    job.flagged = !flags.is_empty();
    job.flags = flags;
}

#[async_trait]
impl Worker<Job> for ProcessWorker {
    async fn process(&self, job: Job, ctx: &JobContext) -> BatchResult<()> {
        let workdir = self.scratch_dir.join(format!("process-{}", job.id));
        let result = self.run(&job, &workdir, ctx).await;
        cleanup_workdir(&workdir).await;
        result
    }
}

/// Run the `process` command
pub async fn run(app: &App, reprocess: bool, cancel: CancellationToken) -> BatchResult<RunSummary> {
    let settings = &app.config.settings;
    let tools = Toolbox::from_config(&settings.tools, &settings.mastering);
    let pipeline = Arc::new(MasteringPipeline::new(
        tools,
        settings.analysis.clone(),
        settings.mastering.clone(),
    ));

    let worker = Arc::new(ProcessWorker::new(
        pipeline,
        app.store.clone(),
        app.blobs.clone(),
        app.fetcher.clone(),
        app.scratch_dir.clone(),
        settings.flags.clone(),
    ));
    app.dispatch(filter(reprocess), worker, cancel).await
}
