// src/exec/coordination.rs

//! Per-job state shared by the sender loop, the watchdog and the capturers.
//!
//! The only read-modify-write in the whole pipeline is the transition out of
//! `Running`. It is a single compare-and-swap: whichever of natural
//! completion or the watchdog gets there first decides how the job ended,
//! and the other path observes "already finished" and does nothing.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use tokio::sync::Notify;
use tracing::Span;

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const TIMED_OUT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    /// The process exited and all of its output was captured.
    Completed,
    /// The watchdog fired first.
    TimedOut,
}

impl JobState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            COMPLETED => JobState::Completed,
            TIMED_OUT => JobState::TimedOut,
            _ => JobState::Running,
        }
    }

    fn as_raw(self) -> u8 {
        match self {
            JobState::Running => RUNNING,
            JobState::Completed => COMPLETED,
            JobState::TimedOut => TIMED_OUT,
        }
    }

    pub fn is_finished(self) -> bool {
        self != JobState::Running
    }
}

#[derive(Debug)]
pub struct JobCoordination {
    state: AtomicU8,
    /// Written once by the launcher stage; read by the watchdog and logs.
    pid: OnceLock<u32>,
    /// Responses handed to the channel so far (delivered or not).
    responses: AtomicU64,
    reaped: AtomicBool,
    finished: Notify,
    span: Span,
}

impl JobCoordination {
    /// `span` is the job's logging context; every task of the job logs
    /// inside it.
    pub fn new(span: Span) -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            pid: OnceLock::new(),
            responses: AtomicU64::new(0),
            reaped: AtomicBool::new(false),
            finished: Notify::new(),
            span,
        }
    }

    pub fn state(&self) -> JobState {
        JobState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Attempt the `Running -> outcome` transition.
    ///
    /// Returns `true` for exactly one caller per job.
    pub fn try_finish(&self, outcome: JobState) -> bool {
        if outcome == JobState::Running {
            return false;
        }

        let won = self
            .state
            .compare_exchange(RUNNING, outcome.as_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.finished.notify_waiters();
        }
        won
    }

    /// Resolve once the job has left `Running`, with the final state.
    pub async fn finished(&self) -> JobState {
        loop {
            // Register before checking so a transition in between still wakes us.
            let notified = self.finished.notified();
            let state = self.state();
            if state.is_finished() {
                return state;
            }
            notified.await;
        }
    }

    /// Record the child pid. Only the first call has any effect.
    pub fn record_pid(&self, pid: u32) -> bool {
        self.pid.set(pid).is_ok()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    /// Reserve the next 1-based response sequence number.
    pub fn next_response_seq(&self) -> u64 {
        self.responses.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Acquire)
    }

    pub fn mark_reaped(&self) {
        self.reaped.store(true, Ordering::Release);
    }

    pub fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::Acquire)
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
