// src/job/descriptor.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::WorkerSection;
use crate::errors::{Result, WorkerError};
use crate::job::command::to_integer;
use crate::types::OutputMode;

/// A numeric field as it arrives on the wire: either a JSON integer or text.
///
/// Dispatchers are inconsistent about this, so both are accepted and
/// coerced through [`to_integer`], which rejects anything that is not a
/// whole non-negative number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericField {
    Int(i64),
    Text(String),
}

impl NumericField {
    pub fn coerce(&self, field: &str) -> Result<u64> {
        match self {
            NumericField::Int(n) if *n >= 0 => Ok(*n as u64),
            NumericField::Int(n) => Err(WorkerError::InvalidArgument(format!(
                "field '{field}': {n} is negative"
            ))),
            NumericField::Text(text) => to_integer(field, text),
        }
    }
}

impl From<u64> for NumericField {
    fn from(value: u64) -> Self {
        NumericField::Text(value.to_string())
    }
}

/// Job request exactly as delivered by the inbound channel.
///
/// Only `id` and `command` are required; everything else falls back to the
/// worker's defaults during [`JobDescriptor::from_raw`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJobDescriptor {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Identifier of the requesting peer, echoed back in every response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_seq: Option<NumericField>,

    /// Target user name. `None` runs the job as the worker's own identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Timeout in whole seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<NumericField>,

    /// Run `command` through `/bin/sh -c`. Off unless the caller asks.
    #[serde(default)]
    pub shell: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<String>,
}

/// Handling of one child output stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamOptions {
    pub mode: OutputMode,
    /// Capture file; present whenever `mode.captures()`.
    pub path: Option<PathBuf>,
}

/// Validated, immutable job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub id: String,
    pub task_id: Option<String>,
    pub source: Option<String>,
    pub request_seq: u64,
    pub run_as: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub shell: bool,
    pub stdout: StreamOptions,
    pub stderr: StreamOptions,
}

impl JobDescriptor {
    /// Coerce and check every field of a raw request.
    ///
    /// Fails with `InvalidArgument` on the first malformed field.
    pub fn from_raw(raw: RawJobDescriptor, limits: &WorkerSection) -> Result<Self> {
        if raw.id.trim().is_empty() {
            return Err(WorkerError::InvalidArgument(
                "job id must not be empty".to_string(),
            ));
        }
        if raw.command.trim().is_empty() {
            return Err(WorkerError::InvalidArgument(
                "command must not be empty".to_string(),
            ));
        }
        if raw.command.contains('\0') || raw.args.iter().any(|a| a.contains('\0')) {
            return Err(WorkerError::InvalidArgument(
                "command and arguments must not contain NUL bytes".to_string(),
            ));
        }

        let request_seq = match raw.request_seq {
            Some(ref field) => field.coerce("request_seq")?,
            None => 0,
        };

        let timeout_secs = match raw.timeout {
            Some(ref field) => field.coerce("timeout")?,
            None => limits.default_timeout_secs,
        };
        if timeout_secs == 0 {
            return Err(WorkerError::InvalidArgument(
                "field 'timeout': must be at least 1 second".to_string(),
            ));
        }
        if timeout_secs > limits.max_timeout_secs {
            return Err(WorkerError::InvalidArgument(format!(
                "field 'timeout': {timeout_secs}s exceeds the maximum of {}s",
                limits.max_timeout_secs
            )));
        }

        let run_as = match raw.run_as {
            Some(name) if name.trim().is_empty() => None,
            other => other,
        };

        let working_dir = match raw.working_dir {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => None,
        };

        let stdout = stream_options("stdout", raw.stdout.as_deref(), raw.stdout_path)?;
        let stderr = stream_options("stderr", raw.stderr.as_deref(), raw.stderr_path)?;

        Ok(Self {
            id: raw.id,
            task_id: raw.task_id,
            source: raw.source,
            request_seq,
            run_as,
            working_dir,
            command: raw.command,
            args: raw.args,
            env: raw.env,
            timeout: Duration::from_secs(timeout_secs),
            shell: raw.shell,
            stdout,
            stderr,
        })
    }
}

fn stream_options(
    field: &str,
    mode: Option<&str>,
    path: Option<String>,
) -> Result<StreamOptions> {
    let mode = match mode {
        Some(text) => text
            .parse::<OutputMode>()
            .map_err(|e| WorkerError::InvalidArgument(format!("field '{field}': {e}")))?,
        None => OutputMode::default(),
    };

    let path = path.filter(|p| !p.trim().is_empty()).map(PathBuf::from);

    if mode.captures() {
        match path {
            Some(ref p) if p.is_absolute() => {}
            Some(ref p) => {
                return Err(WorkerError::InvalidArgument(format!(
                    "field '{field}_path': '{}' must be absolute",
                    p.display()
                )));
            }
            None => {
                return Err(WorkerError::InvalidArgument(format!(
                    "field '{field}': mode {mode:?} requires '{field}_path'"
                )));
            }
        }
    }

    Ok(StreamOptions { mode, path })
}
