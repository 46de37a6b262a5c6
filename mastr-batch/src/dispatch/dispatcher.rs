//! Bounded-concurrency, cursor-paginated job runner
//!
//! Admission is token based: a completion channel with capacity
//! `concurrency` is pre-seeded with `concurrency` success tokens. Admitting a
//! job consumes one message; every worker posts its result back on exit.
//! The number of jobs in flight therefore never exceeds `concurrency`.
//!
//! The consecutive-failure breaker reads the same stream: a success resets
//! the counter, a failure increments it, and once it exceeds
//! `error_threshold` the run stops admitting and fails with the last error.
//! A fatal worker error (see [`BatchError::is_fatal`]) stops it at once.
//!
//! Whatever ends the run (exhausted source, limit, deadline, breaker,
//! cancellation), work already in flight is drained before returning.

use super::{Dispatchable, JobContext, JobSource, Worker};
use crate::error::{BatchError, BatchResult};
use mastr_common::config::DispatchConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-run tuning
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub concurrency: usize,
    pub page_size: usize,
    /// Stop admitting after this many jobs
    pub limit: Option<usize>,
    /// Wall-clock budget; reaching it ends the run successfully
    pub timeout: Option<Duration>,
    /// Consecutive failures tolerated before the run aborts
    pub error_threshold: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            page_size: 50,
            limit: None,
            timeout: None,
            error_threshold: 10,
        }
    }
}

impl From<&DispatchConfig> for RunOptions {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            page_size: config.page_size.max(1),
            limit: config.limit,
            timeout: config.timeout_secs.map(Duration::from_secs),
            error_threshold: config.error_threshold,
        }
    }
}

/// Counters for one completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Run ended because the wall-clock budget ran out
    pub timed_out: bool,
}

/// Why admission stopped
#[derive(Debug)]
enum Stop {
    Exhausted,
    Limit,
    Deadline,
    Failed(BatchError),
}

/// Generic dispatcher
pub struct Dispatcher {
    options: RunOptions,
    context: JobContext,
}

impl Dispatcher {
    pub fn new(options: RunOptions, context: JobContext) -> Self {
        Self { options, context }
    }

    /// Run `worker` over every job `source` yields for `filter`
    pub async fn run<J, S, W>(
        &self,
        source: &S,
        filter: &S::Filter,
        worker: Arc<W>,
    ) -> BatchResult<RunSummary>
    where
        J: Dispatchable,
        S: JobSource<J> + ?Sized,
        W: Worker<J>,
    {
        let concurrency = self.options.concurrency.max(1);
        let page_size = self.options.page_size.max(1);
        let deadline = self.options.timeout.map(|t| Instant::now() + t);
        let cancel = &self.context.cancel;

        let (tx, mut rx) = mpsc::channel::<BatchResult<()>>(concurrency);
        for _ in 0..concurrency {
            // Fresh channel with exactly this much capacity
            let _ = tx.try_send(Ok(()));
        }

        let mut breaker = Breaker::new(self.options.error_threshold);
        let mut summary = RunSummary::default();
        let mut received = 0usize;
        let mut cursor: Option<String> = None;

        info!(
            concurrency,
            page_size,
            limit = ?self.options.limit,
            timeout_secs = ?self.options.timeout.map(|t| t.as_secs()),
            error_threshold = self.options.error_threshold,
            "Dispatch run starting"
        );

        let stop = 'run: loop {
            if self.limit_reached(summary.dispatched) {
                break Stop::Limit;
            }

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'run Stop::Failed(BatchError::Cancelled),
                _ = expired(deadline) => break 'run Stop::Deadline,
                page = source.next_page(cursor.as_deref(), page_size, filter) => page,
            };
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, cursor = ?cursor, "Failed to fetch job page");
                    break Stop::Failed(e);
                }
            };

            debug!(cursor = ?cursor, jobs = page.len(), "Fetched job page");

            if page.is_empty() {
                if summary.dispatched == 0 {
                    break Stop::Failed(BatchError::NoJobsAvailable);
                }
                break Stop::Exhausted;
            }

            let mut admitted = 0usize;
            for job in page {
                if self.limit_reached(summary.dispatched) {
                    break 'run Stop::Limit;
                }

                let key = job.cursor_key().to_string();
                if cursor.as_deref().is_some_and(|last| key.as_str() <= last) {
                    warn!(job_id = %key, cursor = ?cursor, "Source returned job at or behind cursor, skipping");
                    continue;
                }

                // Admission: wait for a token or a finished worker's result
                let token = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'run Stop::Failed(BatchError::Cancelled),
                    _ = expired(deadline) => break 'run Stop::Deadline,
                    token = rx.recv() => token,
                };
                received += 1;

                if let Some(result) = token {
                    summary.record(&result, received > concurrency);
                    match result {
                        Err(e) if e.is_fatal() => break 'run Stop::Failed(e),
                        result => {
                            if let Some(tripped) = breaker.observe(result) {
                                break 'run Stop::Failed(tripped);
                            }
                        }
                    }
                }

                cursor = Some(key.clone());
                summary.dispatched += 1;
                admitted += 1;
                debug!(job_id = %key, dispatched = summary.dispatched, "Admitting job");
                self.spawn_worker(job, key, worker.clone(), tx.clone());
            }

            // Refetching from an unchanged cursor would return the same page forever
            if admitted == 0 {
                warn!(cursor = ?cursor, "Page held no jobs past the cursor, treating source as exhausted");
                break Stop::Exhausted;
            }
        };

        // Drain: one message per seed token plus one per dispatched job
        let expected = concurrency + summary.dispatched;
        let mut late_trip = None;
        while received < expected {
            let Some(result) = rx.recv().await else { break };
            received += 1;
            summary.record(&result, received > concurrency);
            match result {
                Err(e) if e.is_fatal() => {
                    late_trip.get_or_insert(e);
                }
                result => {
                    if let Some(tripped) = breaker.observe(result) {
                        late_trip.get_or_insert(tripped);
                    }
                }
            }
        }

        summary.timed_out = matches!(stop, Stop::Deadline);
        let outcome = match stop {
            Stop::Exhausted | Stop::Limit | Stop::Deadline => match late_trip {
                Some(tripped) => Err(tripped),
                None => Ok(()),
            },
            Stop::Failed(e) => Err(e),
        };

        match &outcome {
            Ok(()) => info!(
                dispatched = summary.dispatched,
                succeeded = summary.succeeded,
                failed = summary.failed,
                timed_out = summary.timed_out,
                "Dispatch run finished"
            ),
            Err(e) => error!(
                dispatched = summary.dispatched,
                succeeded = summary.succeeded,
                failed = summary.failed,
                error = %e,
                "Dispatch run aborted"
            ),
        }

        outcome.map(|()| summary)
    }

    fn limit_reached(&self, dispatched: usize) -> bool {
        self.options.limit.is_some_and(|limit| dispatched >= limit)
    }

    fn spawn_worker<J, W>(
        &self,
        job: J,
        job_id: String,
        worker: Arc<W>,
        tx: mpsc::Sender<BatchResult<()>>,
    ) where
        J: Dispatchable,
        W: Worker<J>,
    {
        let ctx = self.context.clone();
        tokio::spawn(async move {
            let started = Instant::now();

            // Inner task so a panicking worker still reports back
            let body = tokio::spawn(async move { worker.process(job, &ctx).await });
            let result = match body.await {
                Ok(result) => result,
                Err(e) => Err(BatchError::WorkerPanicked(e.to_string())),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(()) => info!(job_id = %job_id, elapsed_ms, "Job completed"),
                Err(e) => error!(
                    job_id = %job_id,
                    elapsed_ms,
                    transient = e.is_transient(),
                    error = %e,
                    "Job failed"
                ),
            }

            if tx.send(result).await.is_err() {
                warn!(job_id = %job_id, "Dispatcher gone before job result was delivered");
            }
        });
    }
}

impl RunSummary {
    fn record(&mut self, result: &BatchResult<()>, from_worker: bool) {
        if !from_worker {
            return;
        }
        match result {
            Ok(()) => self.succeeded += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Consecutive-failure counter
#[derive(Debug)]
struct Breaker {
    threshold: usize,
    consecutive: usize,
}

impl Breaker {
    fn new(threshold: usize) -> Self {
        Self {
            threshold,
            consecutive: 0,
        }
    }

    /// Fold one result in; returns the abort error once the threshold is exceeded
    fn observe(&mut self, result: BatchResult<()>) -> Option<BatchError> {
        match result {
            Ok(()) => {
                if self.consecutive > 0 {
                    debug!(previous = self.consecutive, "Breaker reset");
                }
                self.consecutive = 0;
                None
            }
            Err(e) => {
                self.consecutive += 1;
                if self.consecutive > self.threshold {
                    warn!(failures = self.consecutive, "Breaker tripped");
                    Some(BatchError::BreakerTripped {
                        failures: self.consecutive,
                        last: Box::new(e),
                    })
                } else {
                    None
                }
            }
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
