// src/lib.rs

pub mod channel;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod job;
pub mod logging;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::channel::{
    MpscResponseChannel, ResponseChannel, ResponseHeader, ResponseMessage,
};
use crate::cli::CliArgs;
use crate::config::WorkerConfig;
use crate::config::loader::load_or_default;
use crate::engine::{WorkerContext, spawn_worker};
use crate::errors::WorkerError;
use crate::job::RawJobDescriptor;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the worker runtime and its response channel
/// - a stdin reader turning JSON lines into job descriptors
/// - a stdout writer turning responses into JSON lines
/// - Ctrl-C handling (stop reading, let running jobs finish)
pub async fn run(args: CliArgs) -> Result<()> {
    let config = load_or_default(args.config.as_deref().map(Path::new))
        .context("loading worker config")?;

    if args.check_config {
        print_config(&config);
        return Ok(());
    }

    let (channel, responses) = MpscResponseChannel::new(config.worker.response_queue_length);
    let channel: Arc<dyn ResponseChannel> = Arc::new(channel);
    let send_timeout = config.send_timeout();

    let writer = tokio::spawn(write_responses(responses));

    let ctx = WorkerContext::new(config, Arc::clone(&channel));
    let (jobs_tx, worker) = spawn_worker(ctx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    error!(error = %e, "failed to listen for Ctrl+C");
                }
                info!("interrupt received; no longer accepting jobs");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading job descriptors from stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_job(&line) {
                    Ok(raw) => {
                        if jobs_tx.send(raw).await.is_err() {
                            warn!("worker runtime stopped; no longer accepting jobs");
                            break;
                        }
                    }
                    Err((header, err)) => {
                        warn!(job_id = %header.job_id, error = %err, "malformed job descriptor");
                        let message = ResponseMessage::rejection(&header, 1, &err);
                        if let Err(e) = channel.send(message, send_timeout).await {
                            warn!(job_id = %header.job_id, error = %e, "rejection not delivered");
                        }
                    }
                }
            }
        }
    }

    drop(jobs_tx);
    let summary = worker.await.context("worker runtime panicked")?;

    // The writer ends once every sender (runtime and ours) is gone.
    drop(channel);
    writer.await.context("response writer panicked")??;

    info!(
        jobs = summary.jobs,
        exited = summary.exited,
        timed_out = summary.timed_out,
        rejected = summary.rejected,
        "worker stopped"
    );
    Ok(())
}

/// Decode one inbound line. On failure, returns the best header that can be
/// recovered so the rejection still reaches the right caller.
fn parse_job(line: &str) -> std::result::Result<RawJobDescriptor, (ResponseHeader, WorkerError)> {
    serde_json::from_str::<RawJobDescriptor>(line).map_err(|e| {
        let value: Option<serde_json::Value> = serde_json::from_str(line).ok();
        let field = |name: &str| {
            value
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let header = ResponseHeader {
            job_id: field("id").unwrap_or_default(),
            task_id: field("task_id"),
            source: field("source"),
            request_seq: 0,
        };
        (header, WorkerError::from(e))
    })
}

async fn write_responses(mut rx: mpsc::Receiver<ResponseMessage>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message).context("encoding response")?;
        line.push(b'\n');
        stdout
            .write_all(&line)
            .await
            .context("writing response to stdout")?;
        stdout.flush().await.context("flushing stdout")?;
    }
    Ok(())
}

/// `--check-config` output: the effective settings, one per line.
fn print_config(cfg: &WorkerConfig) {
    println!("execworker config ok");
    println!("  worker.max_concurrent_jobs = {}", cfg.worker.max_concurrent_jobs);
    println!("  worker.inbound_queue_length = {}", cfg.worker.inbound_queue_length);
    println!("  worker.response_queue_length = {}", cfg.worker.response_queue_length);
    println!("  worker.send_timeout_ms = {}", cfg.worker.send_timeout_ms);
    println!("  worker.default_timeout_secs = {}", cfg.worker.default_timeout_secs);
    println!("  worker.max_timeout_secs = {}", cfg.worker.max_timeout_secs);
    println!("  worker.kill_grace_ms = {}", cfg.worker.kill_grace_ms);
    println!("  worker.default_path = {}", cfg.worker.default_path);
    println!("  output.chunk_policy = {:?}", cfg.output.chunk_policy);
    println!("  output.chunk_size = {}", cfg.output.chunk_size);
    println!("  policy.allowed_users = {:?}", cfg.policy.allowed_users);
    println!("  policy.allow_root = {}", cfg.policy.allow_root);
    println!("  policy.allowed_working_dirs = {:?}", cfg.policy.allowed_working_dirs);

    debug!("config check complete (no jobs read)");
}
