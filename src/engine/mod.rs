// src/engine/mod.rs

//! Job intake and concurrency for the worker.
//!
//! The engine accepts job descriptors from an inbound channel and runs each
//! one through [`crate::exec::run_job`] on its own task. Jobs share nothing
//! but the [`WorkerContext`]; the number running at once is bounded by
//! `[worker].max_concurrent_jobs`.
//!
//! The async loop lives in [`runtime`].

use std::fmt;
use std::sync::Arc;

use crate::channel::ResponseChannel;
use crate::config::WorkerConfig;
use crate::errors::ErrorKind;
use crate::exec::DeliveryReport;

pub mod runtime;

pub use runtime::{WorkerRuntime, spawn_worker};

/// What every job needs from the worker: validated config and the channel
/// responses go to.
#[derive(Clone)]
pub struct WorkerContext {
    config: Arc<WorkerConfig>,
    channel: Arc<dyn ResponseChannel>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkerContext {
    pub fn new(config: WorkerConfig, channel: Arc<dyn ResponseChannel>) -> Self {
        Self {
            config: Arc::new(config),
            channel,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn channel(&self) -> Arc<dyn ResponseChannel> {
        Arc::clone(&self.channel)
    }
}

/// How a job ended, from the worker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The process ran and exited (possibly killed by a signal it did not
    /// get from the watchdog).
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The deadline fired and the process group was terminated.
    TimedOut,
    /// No process was created.
    Rejected(ErrorKind),
}

/// Summary of one finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: String,
    pub outcome: JobOutcome,
    pub pid: Option<u32>,
    /// Responses handed to the channel, including the terminal one.
    pub responses_sent: u64,
    pub delivery: DeliveryReport,
}

/// Totals over every job the runtime ran before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub jobs: u64,
    pub exited: u64,
    pub timed_out: u64,
    pub rejected: u64,
    /// Jobs whose terminal response could not be delivered.
    pub undelivered: u64,
}

impl WorkerSummary {
    pub fn record(&mut self, report: &JobReport) {
        self.jobs += 1;
        match report.outcome {
            JobOutcome::Exited { .. } => self.exited += 1,
            JobOutcome::TimedOut => self.timed_out += 1,
            JobOutcome::Rejected(_) => self.rejected += 1,
        }
        if !report.delivery.terminal_delivered {
            self.undelivered += 1;
        }
    }
}
