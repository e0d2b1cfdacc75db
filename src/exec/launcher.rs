// src/exec/launcher.rs

//! Process creation under the validated identity.

use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

use crate::errors::{Result, WorkerError};
use crate::job::{CommandSpec, IdentityContext, StreamOptions};

/// The live child plus its output pipes.
///
/// The child is spawned with `kill_on_drop(true)`: dropping the handle on
/// any early-return path kills the process, so ownership of "must be
/// terminated" moves with the handle.
#[derive(Debug)]
pub struct ExecutionHandle {
    pub child: Child,
    pub pid: u32,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Spawn the command in its own process group.
///
/// When the target differs from the worker, gid then uid are set in the
/// child before exec; the standard library also drops supplementary groups
/// in that case. An exec-time permission error is a `SpawnFailure`.
pub fn launch(
    spec: &CommandSpec,
    identity: &IdentityContext,
    stdout: &StreamOptions,
    stderr: &StreamOptions,
) -> Result<ExecutionHandle> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .env_clear()
        .envs(&spec.env)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(pipe_for(stdout))
        .stderr(pipe_for(stderr))
        .process_group(0)
        .kill_on_drop(true);

    if identity.switches_identity() {
        debug!(
            uid = identity.target.uid,
            gid = identity.target.gid,
            "dropping to target identity before exec"
        );
        cmd.gid(identity.target.gid).uid(identity.target.uid);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| WorkerError::SpawnFailure(format!("'{}': {e}", spec.program)))?;

    let pid = child.id().ok_or_else(|| {
        WorkerError::SpawnFailure(format!("'{}': no pid after spawn", spec.program))
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    Ok(ExecutionHandle {
        child,
        pid,
        stdout,
        stderr,
    })
}

fn pipe_for(options: &StreamOptions) -> Stdio {
    if options.mode.is_piped() {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}
