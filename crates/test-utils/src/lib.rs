pub mod builders;
pub mod recording_channel;

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

use execworker::config::WorkerConfig;
use execworker::engine::WorkerContext;

pub use recording_channel::RecordingChannel;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 10-second timeout.
///
/// Long enough for the deadline scenarios (1s job timeouts), short enough
/// that a job which never sends its terminal response fails the test.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// A worker context whose responses land in a fresh [`RecordingChannel`].
pub fn recording_context(config: WorkerConfig) -> (WorkerContext, RecordingChannel) {
    let channel = RecordingChannel::new();
    let ctx = WorkerContext::new(config, channel.as_channel());
    (ctx, channel)
}

/// Name of the account the tests run under.
pub fn current_user_name() -> String {
    let uid = nix::unistd::geteuid();
    nix::unistd::User::from_uid(uid)
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| uid.as_raw().to_string())
}

/// Whether a process with this pid is still running.
///
/// A zombie counts as gone: once killed, an orphaned grandchild may wait a
/// while for its new parent to reap it.
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // Format: "pid (comm) S ...", comm may itself contain ')'.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z' && state != 'X'),
        Err(_) => false,
    }
}

/// An unprivileged account to switch to, when the tests run as root.
///
/// Identity-switching scenarios return early when this is `None`.
pub fn unprivileged_target() -> Option<String> {
    if !nix::unistd::geteuid().is_root() {
        return None;
    }
    nix::unistd::User::from_name("nobody")
        .ok()
        .flatten()
        .filter(|u| !u.uid.is_root())
        .map(|u| u.name)
}
