// src/errors.rs

//! Crate-wide error type and the error kinds reported to callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailure(String),

    #[error("deadline of {0}s exceeded")]
    Timeout(u64),

    #[error("stream read error: {0}")]
    StreamRead(String),

    #[error("response channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error classification carried in terminal responses.
///
/// Only the first four are ever terminal for a job before spawn; `Timeout`
/// is reported through its own response kind and the last two are absorbed
/// locally, but every variant has a stable wire name for logs and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    InvalidPath,
    InvalidArgument,
    SpawnFailure,
    Timeout,
    StreamReadError,
    ChannelUnavailable,
    Internal,
}

impl WorkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            WorkerError::InvalidPath(_) => ErrorKind::InvalidPath,
            WorkerError::InvalidArgument(_) | WorkerError::JsonError(_) => {
                ErrorKind::InvalidArgument
            }
            WorkerError::SpawnFailure(_) => ErrorKind::SpawnFailure,
            WorkerError::Timeout(_) => ErrorKind::Timeout,
            WorkerError::StreamRead(_) => ErrorKind::StreamReadError,
            WorkerError::ChannelUnavailable(_) => ErrorKind::ChannelUnavailable,
            WorkerError::ConfigError(_)
            | WorkerError::IoError(_)
            | WorkerError::TomlError(_)
            | WorkerError::Other(_) => ErrorKind::Internal,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WorkerError>;
