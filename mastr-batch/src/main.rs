//! mastr-batch - batch mastering of generated tracks
//!
//! Subcommands:
//! - `enqueue <url>...`: add jobs for remote source media
//! - `download`: store remote sources in the blob store
//! - `process` (alias `master`): master, analyze, flag and store each track
//! - `analyze <source>`: print a diagnostic report for one file or URL
//! - `status`: job counts
//!
//! Exits non-zero with the last error when a run aborts; an exhausted job
//! source or an expired `--timeout-secs` budget both exit zero.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mastr_batch::build_info;
use mastr_batch::commands::{self, analyze::AnalyzeOptions, App};
use mastr_batch::config::{BatchConfig, DispatchArgs};
use mastr_batch::dispatch::RunSummary;
use mastr_batch::logging;
use mastr_batch::tools::{AubioBeatTracker, CommandRunner};

/// Command-line arguments for mastr-batch
#[derive(Parser, Debug)]
#[command(name = "mastr-batch")]
#[command(about = "Batch mastering, analysis and flagging of generated tracks")]
#[command(version)]
struct Cli {
    /// Config file (default: $MASTR_CONFIG, ~/.config/mastr/config.toml, /etc/mastr/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder for the database, blobs and scratch space (default: $MASTR_ROOT_FOLDER)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add jobs for remote source URLs
    Enqueue {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Download remote sources into the blob store
    Download {
        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// Master, analyze and flag unprocessed tracks
    #[command(alias = "master")]
    Process {
        #[command(flatten)]
        dispatch: DispatchArgs,

        /// Include tracks that were already processed
        #[arg(long)]
        reprocess: bool,
    },

    /// Print a JSON analysis report for a local file or URL
    Analyze {
        source: String,

        /// Also run the beat tracker and report tempo drift
        #[arg(long)]
        beats: bool,

        /// Write the waveform PNG here
        #[arg(long)]
        waveform: Option<PathBuf>,
    },

    /// Print job counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = logging::init();

    let config = BatchConfig::load(cli.config.as_deref(), cli.root_folder.as_deref())
        .context("Invalid configuration")?;
    log.apply_level(&config.settings.logging.level);

    info!(
        version = build_info::VERSION,
        git_hash = build_info::GIT_HASH,
        built = build_info::BUILD_TIMESTAMP,
        profile = build_info::BUILD_PROFILE,
        "Starting mastr-batch"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Enqueue { urls } => {
            let app = App::open(config).await?;
            for job in app.store.enqueue(&urls).await? {
                println!("{}", job.id);
            }
        }
        Command::Download { dispatch } => {
            let app = App::open(config.with_dispatch_args(&dispatch)?).await?;
            let summary = commands::download::run(&app, cancel)
                .await
                .context("Download run failed")?;
            report(&summary);
        }
        Command::Process { dispatch, reprocess } => {
            let app = App::open(config.with_dispatch_args(&dispatch)?).await?;
            let summary = commands::process::run(&app, reprocess, cancel)
                .await
                .context("Process run failed")?;
            report(&summary);
        }
        Command::Analyze {
            source,
            beats,
            waveform,
        } => {
            let app = App::open(config).await?;
            let tools = &app.config.settings.tools;
            let tracker = AubioBeatTracker::new(
                tools.beat_tracker.clone(),
                CommandRunner::new(std::time::Duration::from_secs(tools.timeout_secs)),
            );
            if beats && !tracker.is_available() {
                warn!(binary = %tools.beat_tracker.display(), "Beat tracker not available");
            }

            let options = AnalyzeOptions {
                beat_tracker: beats.then_some(&tracker as &dyn mastr_batch::tools::BeatTracker),
                waveform_out: waveform.as_deref(),
                scratch_dir: app.scratch_dir.clone(),
            };
            let report = commands::analyze::analyze(
                &source,
                &app.config.settings,
                &app.fetcher,
                options,
                &cancel,
            )
            .await
            .with_context(|| format!("Analysis of {} failed", source))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Status => {
            let app = App::open(config).await?;
            let (total, processed, flagged) = app.store.counts().await?;
            println!("jobs: {total}  processed: {processed}  flagged: {flagged}");
        }
    }

    Ok(())
}

fn report(summary: &RunSummary) {
    info!(
        dispatched = summary.dispatched,
        succeeded = summary.succeeded,
        failed = summary.failed,
        timed_out = summary.timed_out,
        "Run complete"
    );
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, cancelling run"),
        _ = terminate => info!("Received terminate signal, cancelling run"),
    }
}
