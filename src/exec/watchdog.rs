// src/exec/watchdog.rs

//! Deadline enforcement for one job.

use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::coordination::{JobCoordination, JobState};

const REAP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// The deadline passed first; the process group was signalled.
    TimedOut,
    /// The job finished before the deadline, or natural completion won the
    /// race for the transition.
    CompletedNaturally,
}

/// Wait for the deadline or for the job to finish, whichever comes first.
///
/// On deadline the watchdog competes for the `Running -> TimedOut`
/// transition; only if it wins does it terminate the child's process group.
/// The sender loop wakes on the same transition and sends the terminal
/// response.
pub async fn watch_deadline(
    coordination: Arc<JobCoordination>,
    timeout: Duration,
    kill_grace: Duration,
) -> WatchdogVerdict {
    tokio::select! {
        state = coordination.finished() => {
            debug!(?state, "job finished before its deadline");
            return WatchdogVerdict::CompletedNaturally;
        }
        _ = sleep(timeout) => {}
    }

    if !coordination.try_finish(JobState::TimedOut) {
        debug!("deadline reached but job had already finished");
        return WatchdogVerdict::CompletedNaturally;
    }

    warn!(
        timeout_secs = timeout.as_secs(),
        pid = ?coordination.pid(),
        "deadline exceeded; terminating process group"
    );
    terminate_process_group(&coordination, kill_grace).await;

    WatchdogVerdict::TimedOut
}

/// Signal the job's process group: SIGTERM, up to `grace` for the child to
/// be reaped, then SIGKILL. A zero grace goes straight to SIGKILL.
pub async fn terminate_process_group(coordination: &JobCoordination, grace: Duration) {
    let Some(pid) = coordination.pid() else {
        debug!("no pid recorded; nothing to terminate");
        return;
    };
    // The child leads its own group (spawned with process_group(0)).
    let pgid = Pid::from_raw(pid as i32);

    if !grace.is_zero() {
        signal_group(pgid, Signal::SIGTERM);

        let deadline = Instant::now() + grace;
        while !coordination.is_reaped() && Instant::now() < deadline {
            sleep(REAP_POLL).await;
        }
    }

    // Once the leader is reaped its pid, and so the pgid, can be reused as
    // soon as the group is empty. Only kill while members remain.
    if coordination.is_reaped() && group_is_empty(pgid) {
        debug!(pgid = pgid.as_raw(), "leader reaped and group empty; skipping SIGKILL");
        return;
    }

    // Also sent after a graceful exit: stragglers in the group may still
    // hold the output pipes open.
    signal_group(pgid, Signal::SIGKILL);
}

fn group_is_empty(pgid: Pid) -> bool {
    matches!(killpg(pgid, None), Err(Errno::ESRCH))
}

fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) => info!(pgid = pgid.as_raw(), ?signal, "signalled process group"),
        Err(Errno::ESRCH) => {
            debug!(pgid = pgid.as_raw(), ?signal, "process group already gone")
        }
        Err(errno) => warn!(
            pgid = pgid.as_raw(),
            ?signal,
            error = %errno,
            "failed to signal process group"
        ),
    }
}
