// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::exec::run_job;
use crate::job::RawJobDescriptor;

use super::{JobReport, WorkerContext, WorkerSummary};

/// Accepts job descriptors and runs them concurrently.
///
/// Each job gets its own task; a semaphore bounds how many run at once, so
/// a burst of submissions queues in the inbound channel instead of forking
/// an unbounded number of processes. When the inbound channel closes the
/// runtime stops accepting and waits for every running job to finish.
pub struct WorkerRuntime {
    ctx: WorkerContext,
    inbound: mpsc::Receiver<RawJobDescriptor>,
    limiter: Arc<Semaphore>,
}

impl fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("ctx", &self.ctx)
            .field("available_slots", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

impl WorkerRuntime {
    pub fn new(ctx: WorkerContext, inbound: mpsc::Receiver<RawJobDescriptor>) -> Self {
        let limit = ctx.config().worker.max_concurrent_jobs.max(1);
        Self {
            ctx,
            inbound,
            limiter: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Main intake loop. Returns once the inbound channel is closed and
    /// every accepted job has sent its terminal response.
    pub async fn run(mut self) -> WorkerSummary {
        info!(
            max_concurrent_jobs = self.ctx.config().worker.max_concurrent_jobs,
            "worker runtime started"
        );

        let mut jobs: JoinSet<JobReport> = JoinSet::new();
        let mut summary = WorkerSummary::default();

        loop {
            tokio::select! {
                Some(done) = jobs.join_next(), if !jobs.is_empty() => {
                    record(&mut summary, done);
                }
                next = self.inbound.recv() => {
                    let Some(raw) = next else {
                        info!(running = jobs.len(), "inbound channel closed; draining");
                        break;
                    };

                    // The limiter is never closed.
                    let Ok(permit) = Arc::clone(&self.limiter).acquire_owned().await else {
                        error!("job limiter closed; dropping job");
                        continue;
                    };

                    debug!(job_id = %raw.id, running = jobs.len(), "dispatching job");
                    let ctx = self.ctx.clone();
                    jobs.spawn(async move {
                        let report = run_job(raw, &ctx).await;
                        drop(permit);
                        report
                    });
                }
            }
        }

        while let Some(done) = jobs.join_next().await {
            record(&mut summary, done);
        }

        info!(
            jobs = summary.jobs,
            exited = summary.exited,
            timed_out = summary.timed_out,
            rejected = summary.rejected,
            undelivered = summary.undelivered,
            "worker runtime exiting"
        );
        summary
    }
}

fn record(summary: &mut WorkerSummary, done: Result<JobReport, tokio::task::JoinError>) {
    match done {
        Ok(report) => {
            debug!(job_id = %report.job_id, outcome = ?report.outcome, "job finished");
            summary.record(&report);
        }
        Err(e) => error!(error = %e, "job task failed"),
    }
}

/// Start a runtime on its own task.
///
/// Returns the submission side of the inbound channel and a handle that
/// resolves to the summary once the sender is dropped and all jobs are done.
pub fn spawn_worker(
    ctx: WorkerContext,
) -> (mpsc::Sender<RawJobDescriptor>, JoinHandle<WorkerSummary>) {
    let capacity = ctx.config().worker.inbound_queue_length.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let runtime = WorkerRuntime::new(ctx, rx);
    (tx, tokio::spawn(runtime.run()))
}
