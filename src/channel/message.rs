// src/channel/message.rs

//! Messages produced for the outbound response channel.
//!
//! Per job the channel sees zero or more `output` messages followed by
//! exactly one terminal message (`exit`, `timeout` or `error`).

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, WorkerError};
use crate::job::{JobDescriptor, NumericField, RawJobDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Incremental output while the job runs.
    Output,
    /// The process exited on its own.
    Exit,
    /// The process was killed for exceeding its deadline.
    Timeout,
    /// The job was rejected or could not be started.
    Error,
}

impl ResponseKind {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseKind::Output)
    }
}

/// Fields every response of one job repeats, so the caller can route it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    pub job_id: String,
    pub task_id: Option<String>,
    pub source: Option<String>,
    pub request_seq: u64,
}

impl ResponseHeader {
    pub fn for_job(job: &JobDescriptor) -> Self {
        Self {
            job_id: job.id.clone(),
            task_id: job.task_id.clone(),
            source: job.source.clone(),
            request_seq: job.request_seq,
        }
    }

    /// Best-effort header for a request that failed validation; malformed
    /// fields are left at their defaults.
    pub fn for_raw(raw: &RawJobDescriptor) -> Self {
        Self {
            job_id: raw.id.clone(),
            task_id: raw.task_id.clone(),
            source: raw.source.clone(),
            request_seq: raw
                .request_seq
                .as_ref()
                .and_then(|seq: &NumericField| seq.coerce("request_seq").ok())
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub request_seq: u64,
    /// 1-based position of this message within the job's responses.
    pub response_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub kind: ResponseKind,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseMessage {
    pub fn new(header: &ResponseHeader, response_seq: u64, kind: ResponseKind) -> Self {
        Self {
            job_id: header.job_id.clone(),
            task_id: header.task_id.clone(),
            source: header.source.clone(),
            request_seq: header.request_seq,
            response_seq,
            pid: None,
            kind,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            signal: None,
            error: None,
            message: None,
        }
    }

    /// Terminal `error` message for a job that never started.
    pub fn rejection(header: &ResponseHeader, response_seq: u64, err: &WorkerError) -> Self {
        let mut msg = Self::new(header, response_seq, ResponseKind::Error);
        msg.error = Some(err.kind());
        msg.message = Some(err.to_string());
        msg
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Exit code 0 from a natural exit.
    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Exit && self.exit_code == Some(0)
    }
}
