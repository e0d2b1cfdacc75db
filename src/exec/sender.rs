// src/exec/sender.rs

//! Response delivery for one job.
//!
//! All of a job's responses go through one `ResponseSender`, driven from the
//! job's sender loop, which is what keeps them in capture order. The
//! terminal send consumes the sender, so a second terminal response for the
//! same job cannot be expressed.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::channel::{ResponseChannel, ResponseHeader, ResponseKind, ResponseMessage};
use crate::config::WorkerConfig;
use crate::errors::{Result, WorkerError};
use crate::job::identity::{Access, check_search_path, may_access};
use crate::job::{IdentityContext, JobDescriptor, StreamOptions};
use crate::types::{OutputMode, StreamKind};

use super::capture::CapturedChunk;
use super::coordination::JobCoordination;
use super::pack::{PackSlice, ResponsePack};

/// How the job's process ended, as reported in the terminal response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    TimedOut {
        timeout_secs: u64,
    },
}

/// Delivery statistics returned by the terminal send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    pub delivered: u64,
    pub failed: u64,
    pub terminal_delivered: bool,
}

/// Where one stream's chunks go besides the pack.
#[derive(Debug)]
struct StreamSink {
    mode: OutputMode,
    path: Option<PathBuf>,
    file: Option<File>,
}

impl StreamSink {
    fn returning() -> Self {
        Self {
            mode: OutputMode::Return,
            path: None,
            file: None,
        }
    }
}

pub struct ResponseSender {
    channel: Arc<dyn ResponseChannel>,
    header: ResponseHeader,
    coordination: Arc<JobCoordination>,
    send_timeout: Duration,
    pack: ResponsePack,
    stdout: StreamSink,
    stderr: StreamSink,
    report: DeliveryReport,
}

impl ResponseSender {
    pub fn new(
        channel: Arc<dyn ResponseChannel>,
        header: ResponseHeader,
        coordination: Arc<JobCoordination>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            channel,
            header,
            coordination,
            send_timeout: config.send_timeout(),
            pack: ResponsePack::new(config.output.chunk_policy, config.output.chunk_size),
            stdout: StreamSink::returning(),
            stderr: StreamSink::returning(),
            report: DeliveryReport::default(),
        }
    }

    pub fn set_header(&mut self, header: ResponseHeader) {
        self.header = header;
    }

    /// Apply the job's output modes and open capture files.
    ///
    /// Runs before spawn, so a capture file that cannot be opened rejects
    /// the job instead of losing output later. The worker opens the file on
    /// the child's behalf, so it is only opened if the target user could
    /// write it: an existing file must already be writable by them, a new
    /// one is created owned by them.
    pub async fn prepare_streams(
        &mut self,
        job: &JobDescriptor,
        identity: &IdentityContext,
        config: &WorkerConfig,
    ) -> Result<()> {
        self.stdout = open_sink(&job.stdout, identity, config).await?;
        self.stderr = open_sink(&job.stderr, identity, config).await?;
        Ok(())
    }

    /// Persist a captured chunk if its stream is captured, queue it for the
    /// caller if its stream is returned, then send whatever is ready.
    pub async fn check_and_write(&mut self, chunk: CapturedChunk) {
        let sink = match chunk.stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };

        if sink.mode.captures() {
            if let Some(file) = sink.file.as_mut() {
                if let Err(e) = file.write_all(&chunk.bytes).await {
                    warn!(
                        stream = ?chunk.stream,
                        path = ?sink.path,
                        error = %e,
                        "failed to persist captured output"
                    );
                }
            }
        }

        if sink.mode.returns() {
            self.pack.append(chunk.stream, &chunk.bytes);
            self.check_and_send().await;
        }
    }

    /// Send one `output` message per chunk boundary reached.
    pub async fn check_and_send(&mut self) {
        while self.pack.ready() {
            let slice = self.pack.take_ready();
            let message = self.output_message(slice, ResponseKind::Output);
            self.deliver(message).await;
        }
    }

    /// Send the terminal response carrying everything still pending.
    pub async fn last_check_and_send(mut self, termination: Termination) -> DeliveryReport {
        self.flush_captures().await;

        let slice = self.pack.take_all();
        let message = match termination {
            Termination::Exited { code, signal } => {
                let mut msg = self.output_message(slice, ResponseKind::Exit);
                msg.exit_code = code;
                msg.signal = signal;
                msg
            }
            Termination::TimedOut { timeout_secs } => {
                let mut msg = self.output_message(slice, ResponseKind::Timeout);
                let err = WorkerError::Timeout(timeout_secs);
                msg.error = Some(err.kind());
                msg.message = Some(err.to_string());
                msg
            }
        };

        self.finish(message).await
    }

    /// Terminal `error` response for a job that never produced a process.
    pub async fn reject(self, err: &WorkerError) -> DeliveryReport {
        let seq = self.coordination.next_response_seq();
        let message = ResponseMessage::rejection(&self.header, seq, err);
        self.finish(message).await
    }

    async fn finish(mut self, message: ResponseMessage) -> DeliveryReport {
        let kind = message.kind;
        self.report.terminal_delivered = self.deliver(message).await;
        info!(
            ?kind,
            responses = self.coordination.responses(),
            delivered = self.report.delivered,
            failed = self.report.failed,
            terminal_delivered = self.report.terminal_delivered,
            "terminal response sent"
        );
        self.report
    }

    fn output_message(&self, slice: PackSlice, kind: ResponseKind) -> ResponseMessage {
        let seq = self.coordination.next_response_seq();
        let mut msg = ResponseMessage::new(&self.header, seq, kind);
        msg.pid = self.coordination.pid();
        msg.stdout = slice.stdout;
        msg.stderr = slice.stderr;
        msg
    }

    async fn deliver(&mut self, message: ResponseMessage) -> bool {
        let seq = message.response_seq;
        match self.channel.send(message, self.send_timeout).await {
            Ok(()) => {
                self.report.delivered += 1;
                debug!(response_seq = seq, "response delivered");
                true
            }
            Err(err) => {
                self.report.failed += 1;
                warn!(response_seq = seq, error = %err, "response not delivered");
                false
            }
        }
    }

    async fn flush_captures(&mut self) {
        for sink in [&mut self.stdout, &mut self.stderr] {
            if let Some(file) = sink.file.as_mut() {
                if let Err(e) = file.flush().await {
                    warn!(path = ?sink.path, error = %e, "failed to flush capture file");
                }
            }
        }
    }
}

async fn open_sink(
    options: &StreamOptions,
    identity: &IdentityContext,
    config: &WorkerConfig,
) -> Result<StreamSink> {
    let file = match (options.mode.captures(), options.path.as_deref()) {
        (true, Some(path)) => Some(open_capture_file(path, identity, config).await?),
        _ => None,
    };
    Ok(StreamSink {
        mode: options.mode,
        path: options.path.clone(),
        file,
    })
}

async fn open_capture_file(
    path: &Path,
    identity: &IdentityContext,
    config: &WorkerConfig,
) -> Result<File> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(WorkerError::InvalidPath(format!(
            "capture file '{}' has no file name",
            path.display()
        )));
    };

    let dir = std::fs::canonicalize(parent).map_err(|e| {
        WorkerError::InvalidPath(format!("capture directory '{}': {e}", parent.display()))
    })?;
    if !config.permits_working_dir(&dir) {
        return Err(WorkerError::InvalidPath(format!(
            "capture directory '{}' is outside [policy].allowed_working_dirs",
            dir.display()
        )));
    }
    check_search_path(&dir, identity)?;

    let path = dir.join(name);
    match open_existing(&path).await {
        Ok(file) => {
            let meta = file.metadata().await.map_err(|e| open_error(&path, e))?;
            if !meta.is_file() {
                return Err(WorkerError::InvalidPath(format!(
                    "capture file '{}' is not a regular file",
                    path.display()
                )));
            }
            if !may_access(&meta, identity, Access::Write) {
                return Err(WorkerError::PermissionDenied(format!(
                    "user '{}' cannot write capture file '{}'",
                    identity.target.name,
                    path.display()
                )));
            }
            Ok(file)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            create_capture_file(&path, &dir, identity).await
        }
        Err(e) => Err(open_error(&path, e)),
    }
}

async fn create_capture_file(
    path: &Path,
    dir: &Path,
    identity: &IdentityContext,
) -> Result<File> {
    let dir_meta = std::fs::metadata(dir).map_err(|e| open_error(dir, e))?;
    if !may_access(&dir_meta, identity, Access::Write) {
        return Err(WorkerError::PermissionDenied(format!(
            "user '{}' cannot create files in '{}'",
            identity.target.name,
            dir.display()
        )));
    }

    let file = OpenOptions::new()
        .append(true)
        .create_new(true)
        .mode(0o600)
        .custom_flags(OFlag::O_NOFOLLOW.bits())
        .open(path)
        .await
        .map_err(|e| open_error(path, e))?;

    if identity.switches_identity() {
        std::os::unix::fs::fchown(&file, Some(identity.target.uid), Some(identity.target.gid))
            .map_err(|e| {
                WorkerError::PermissionDenied(format!(
                    "handing capture file '{}' to uid {}: {e}",
                    path.display(),
                    identity.target.uid
                ))
            })?;
    }
    debug!(path = %path.display(), uid = identity.target.uid, "created capture file");

    Ok(file)
}

/// Open an existing capture file without following a final symlink and
/// without blocking on a FIFO.
async fn open_existing(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .append(true)
        .custom_flags((OFlag::O_NOFOLLOW | OFlag::O_NONBLOCK).bits())
        .open(path)
        .await
}

fn open_error(path: &Path, e: io::Error) -> WorkerError {
    if e.raw_os_error() == Some(Errno::ELOOP as i32) {
        return WorkerError::InvalidPath(format!(
            "capture file '{}' is a symbolic link",
            path.display()
        ));
    }
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            WorkerError::PermissionDenied(format!("capture file '{}': {e}", path.display()))
        }
        _ => WorkerError::InvalidPath(format!("capture file '{}': {e}", path.display())),
    }
}
