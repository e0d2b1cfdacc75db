// src/job/command.rs

//! Argv-style command construction.
//!
//! The command text of a job is never handed to a shell implicitly. It is
//! tokenized with shell quoting rules (no expansion, no substitution, no
//! redirection) and the job's `args` are appended as discrete elements. A
//! caller that really wants shell semantics sets `shell = true`, and even
//! then `args` are passed as positional parameters rather than spliced into
//! the script text.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::WorkerConfig;
use crate::errors::{Result, WorkerError};
use crate::job::descriptor::JobDescriptor;
use crate::job::identity::IdentityContext;

const SHELL: &str = "/bin/sh";

static ENV_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env key pattern is valid")
});

/// Fully resolved invocation: program, argv, environment and directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    /// Arguments as discrete elements (never a joined shell string).
    pub args: Vec<String>,
    /// Complete child environment; the worker's own is not inherited.
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
}

impl CommandSpec {
    /// Shell-quoted rendering for logs. Never executed.
    pub fn display(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

/// Build the invocation for a validated job.
///
/// Pure: the same job, identity, directory and config always give the same
/// `CommandSpec`.
pub fn build_command(
    job: &JobDescriptor,
    identity: &IdentityContext,
    cwd: PathBuf,
    config: &WorkerConfig,
) -> Result<CommandSpec> {
    let (program, args) = if job.shell {
        shell_argv(job)
    } else {
        direct_argv(job)?
    };

    let env = child_environment(job, identity, config)?;

    Ok(CommandSpec {
        program,
        args,
        env,
        cwd,
    })
}

fn direct_argv(job: &JobDescriptor) -> Result<(String, Vec<String>)> {
    let mut words = shell_words::split(&job.command).map_err(|e| {
        WorkerError::InvalidArgument(format!("field 'command': {e}"))
    })?;
    if words.is_empty() {
        return Err(WorkerError::InvalidArgument(
            "field 'command': no program to run".to_string(),
        ));
    }

    let program = words.remove(0);
    words.extend(job.args.iter().cloned());
    Ok((program, words))
}

/// `/bin/sh -c <command> sh <args...>`: `args` become `$1..$n`.
fn shell_argv(job: &JobDescriptor) -> (String, Vec<String>) {
    let mut args = vec!["-c".to_string(), job.command.clone(), "sh".to_string()];
    args.extend(job.args.iter().cloned());
    (SHELL.to_string(), args)
}

fn child_environment(
    job: &JobDescriptor,
    identity: &IdentityContext,
    config: &WorkerConfig,
) -> Result<BTreeMap<String, String>> {
    let target = &identity.target;
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), config.worker.default_path.clone());
    env.insert("HOME".to_string(), target.home.display().to_string());
    env.insert("USER".to_string(), target.name.clone());
    env.insert("LOGNAME".to_string(), target.name.clone());
    env.insert("SHELL".to_string(), target.shell.display().to_string());

    for (key, value) in job.env.iter() {
        if !ENV_KEY.is_match(key) {
            return Err(WorkerError::InvalidArgument(format!(
                "environment variable name '{key}' is not valid"
            )));
        }
        if value.contains('\0') {
            return Err(WorkerError::InvalidArgument(format!(
                "environment variable '{key}' contains a NUL byte"
            )));
        }
        env.insert(key.clone(), value.clone());
    }

    Ok(env)
}

/// Parse a textual integer field.
///
/// Whitespace around the number is tolerated; anything else (signs,
/// fractions, trailing garbage, overflow) is an `InvalidArgument` naming the
/// field, never a truncated value.
pub fn to_integer(field: &str, text: &str) -> Result<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WorkerError::InvalidArgument(format!(
            "field '{field}': '{text}' is not a non-negative integer"
        )));
    }
    trimmed.parse::<u64>().map_err(|e| {
        WorkerError::InvalidArgument(format!("field '{field}': '{text}': {e}"))
    })
}
