// src/exec/pipeline.rs

//! The per-job execution pipeline.
//!
//! validate -> build -> launch -> {capturers, watchdog} -> sender loop.
//!
//! The sender loop is the job's coordinating task. It owns the child, the
//! `ResponseSender` and the receiving end of the capture channel, and it
//! performs every send for the job, the terminal one last. The watchdog
//! only ever flips the shared state and signals the process group; the
//! loop notices the flip and finalizes.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::channel::ResponseHeader;
use crate::engine::{JobOutcome, JobReport, WorkerContext};
use crate::errors::{Result, WorkerError};
use crate::job::{
    CommandSpec, IdentityContext, JobDescriptor, RawJobDescriptor, build_command, check_cwd,
    check_uid,
};
use crate::types::StreamKind;

use super::capture::{CapturedChunk, spawn_capturer};
use super::coordination::{JobCoordination, JobState};
use super::launcher::{ExecutionHandle, launch};
use super::sender::{ResponseSender, Termination};
use super::watchdog::watch_deadline;

/// Captured chunks buffered between the capturers and the sender loop.
const CHUNK_QUEUE: usize = 64;

/// Extra time allowed for reaping after the watchdog's SIGKILL.
const REAP_MARGIN: Duration = Duration::from_secs(2);

struct PreparedJob {
    job: JobDescriptor,
    identity: IdentityContext,
    spec: CommandSpec,
}

/// Run one job to completion and report how it ended.
///
/// Never fails: every error becomes the job's terminal response. By the
/// time this returns the child (if any) has been reaped and exactly one
/// terminal response has been handed to the channel.
pub async fn run_job(raw: RawJobDescriptor, ctx: &WorkerContext) -> JobReport {
    let span = info_span!("job", job_id = %raw.id);
    run_job_inner(raw, ctx, span.clone()).instrument(span).await
}

async fn run_job_inner(
    raw: RawJobDescriptor,
    ctx: &WorkerContext,
    span: tracing::Span,
) -> JobReport {
    let job_id = raw.id.clone();
    let coordination = Arc::new(JobCoordination::new(span));
    let mut sender = ResponseSender::new(
        ctx.channel(),
        ResponseHeader::for_raw(&raw),
        Arc::clone(&coordination),
        ctx.config(),
    );

    info!(command = %raw.command, run_as = ?raw.run_as, "job accepted");

    let prepared = match prepare(raw, ctx, &mut sender).await {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!(kind = ?err.kind(), error = %err, "job rejected before spawn");
            return reject(job_id, err, sender, &coordination).await;
        }
    };

    execute(prepared, coordination, sender, ctx).await
}

/// Validator and builder stages. Nothing here creates a process.
async fn prepare(
    raw: RawJobDescriptor,
    ctx: &WorkerContext,
    sender: &mut ResponseSender,
) -> Result<PreparedJob> {
    let config = ctx.config();
    let job = JobDescriptor::from_raw(raw, &config.worker)?;
    sender.set_header(ResponseHeader::for_job(&job));

    let identity = check_uid(&job, config)?;
    let cwd = check_cwd(&job, &identity, config)?;
    let spec = build_command(&job, &identity, cwd, config)?;
    sender.prepare_streams(&job, &identity, config).await?;

    Ok(PreparedJob {
        job,
        identity,
        spec,
    })
}

async fn reject(
    job_id: String,
    err: WorkerError,
    sender: ResponseSender,
    coordination: &JobCoordination,
) -> JobReport {
    let kind = err.kind();
    let delivery = sender.reject(&err).await;
    JobReport {
        job_id,
        outcome: JobOutcome::Rejected(kind),
        pid: None,
        responses_sent: coordination.responses(),
        delivery,
    }
}

async fn execute(
    prepared: PreparedJob,
    coordination: Arc<JobCoordination>,
    mut sender: ResponseSender,
    ctx: &WorkerContext,
) -> JobReport {
    let PreparedJob {
        job,
        identity,
        spec,
    } = prepared;
    let config = ctx.config();

    let handle = match launch(&spec, &identity, &job.stdout, &job.stderr) {
        Ok(handle) => handle,
        Err(err) => {
            error!(command = %spec.display(), error = %err, "spawn failed");
            return reject(job.id, err, sender, &coordination).await;
        }
    };

    let ExecutionHandle {
        mut child,
        pid,
        stdout,
        stderr,
    } = handle;
    coordination.record_pid(pid);
    info!(
        pid,
        user = %identity.target.name,
        cwd = %spec.cwd.display(),
        command = %spec.display(),
        timeout_secs = job.timeout.as_secs(),
        "process started"
    );

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<CapturedChunk>(CHUNK_QUEUE);
    let chunk_size = config.output.chunk_size;
    let mut capturers = Vec::new();
    if let Some(out) = stdout {
        capturers.push(spawn_capturer(
            StreamKind::Stdout,
            out,
            chunk_size,
            chunk_tx.clone(),
            coordination.span().clone(),
        ));
    }
    if let Some(err) = stderr {
        capturers.push(spawn_capturer(
            StreamKind::Stderr,
            err,
            chunk_size,
            chunk_tx.clone(),
            coordination.span().clone(),
        ));
    }
    // The loop sees end-of-output once every capturer has dropped its sender.
    drop(chunk_tx);

    let watchdog = tokio::spawn(
        watch_deadline(Arc::clone(&coordination), job.timeout, config.kill_grace())
            .instrument(coordination.span().clone()),
    );

    let mut exit: Option<ExitStatus> = None;
    let mut streams_open = true;

    loop {
        if exit.is_some() && !streams_open && coordination.try_finish(JobState::Completed) {
            debug!("process exited and output drained");
        }
        if coordination.is_finished() {
            break;
        }

        tokio::select! {
            biased;

            chunk = chunk_rx.recv(), if streams_open => match chunk {
                Some(chunk) => sender.check_and_write(chunk).await,
                None => streams_open = false,
            },

            status = child.wait(), if exit.is_none() => match status {
                Ok(status) => {
                    coordination.mark_reaped();
                    debug!(?status, "process reaped");
                    exit = Some(status);
                }
                Err(e) => {
                    error!(error = %e, "waiting on process failed; killing it");
                    exit = Some(force_reap(&mut child, &coordination).await);
                }
            },

            _ = coordination.finished() => {}
        }
    }

    let termination = match coordination.state() {
        JobState::TimedOut => {
            // Forced finalization: keep what was already captured, stop
            // reading, and make sure the killed child is reaped.
            while let Ok(chunk) = chunk_rx.try_recv() {
                sender.check_and_write(chunk).await;
            }
            if exit.is_none() {
                let status =
                    reap_after_kill(&mut child, &coordination, config.kill_grace() + REAP_MARGIN)
                        .await;
                debug!(?status, "timed-out process reaped");
            }
            Termination::TimedOut {
                timeout_secs: job.timeout.as_secs(),
            }
        }
        _ => {
            let status = exit.unwrap_or_else(|| ExitStatus::from_raw(0));
            Termination::Exited {
                code: status.code(),
                signal: status.signal(),
            }
        }
    };

    for capturer in capturers {
        capturer.abort();
    }
    if let Err(e) = watchdog.await {
        warn!(error = %e, "watchdog task did not finish cleanly");
    }

    let outcome = match termination {
        Termination::Exited { code, signal } => JobOutcome::Exited { code, signal },
        Termination::TimedOut { .. } => JobOutcome::TimedOut,
    };

    let delivery = sender.last_check_and_send(termination).await;

    JobReport {
        job_id: job.id,
        outcome,
        pid: Some(pid),
        responses_sent: coordination.responses(),
        delivery,
    }
}

/// Wait for a child the watchdog has signalled, escalating to a direct kill
/// if it is still around after `limit`.
async fn reap_after_kill(
    child: &mut Child,
    coordination: &JobCoordination,
    limit: Duration,
) -> ExitStatus {
    match timeout(limit, child.wait()).await {
        Ok(Ok(status)) => {
            coordination.mark_reaped();
            status
        }
        Ok(Err(e)) => {
            warn!(error = %e, "waiting on killed process failed");
            force_reap(child, coordination).await
        }
        Err(_) => {
            warn!(
                limit_ms = limit.as_millis() as u64,
                "process survived group kill; killing directly"
            );
            force_reap(child, coordination).await
        }
    }
}

async fn force_reap(child: &mut Child, coordination: &JobCoordination) -> ExitStatus {
    if let Err(e) = child.kill().await {
        error!(error = %e, "killing process failed");
    }
    coordination.mark_reaped();
    // Reported as killed by SIGKILL: the real status is not observable here.
    ExitStatus::from_raw(Signal::SIGKILL as i32)
}
