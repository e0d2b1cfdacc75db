use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use execworker::channel::{ResponseChannel, ResponseMessage};
use execworker::errors::{Result, WorkerError};

/// A response channel that:
/// - records every message it accepts, in arrival order
/// - optionally refuses everything after the first `accept_limit` messages,
///   the way a consumer that went away would.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    messages: Arc<Mutex<Vec<ResponseMessage>>>,
    accept_limit: Option<usize>,
    attempts: Arc<Mutex<usize>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `limit` messages, then fail every send with
    /// `ChannelUnavailable`.
    pub fn failing_after(limit: usize) -> Self {
        Self {
            accept_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn as_channel(&self) -> Arc<dyn ResponseChannel> {
        Arc::new(self.clone())
    }

    /// Snapshot of everything accepted so far.
    pub fn messages(&self) -> Vec<ResponseMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Accepted messages of one job, in order.
    pub fn messages_for(&self, job_id: &str) -> Vec<ResponseMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.job_id == job_id)
            .collect()
    }

    /// The terminal messages of one job. A correct worker yields exactly one.
    pub fn terminals_for(&self, job_id: &str) -> Vec<ResponseMessage> {
        self.messages_for(job_id)
            .into_iter()
            .filter(|m| m.is_terminal())
            .collect()
    }

    /// Concatenated stdout of one job across all of its messages.
    pub fn stdout_of(&self, job_id: &str) -> String {
        self.messages_for(job_id)
            .iter()
            .map(|m| m.stdout.as_str())
            .collect()
    }

    pub fn stderr_of(&self, job_id: &str) -> String {
        self.messages_for(job_id)
            .iter()
            .map(|m| m.stderr.as_str())
            .collect()
    }

    /// Every send attempted, accepted or not.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl ResponseChannel for RecordingChannel {
    fn send(
        &self,
        message: ResponseMessage,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            {
                let mut attempts = self.attempts.lock().unwrap();
                *attempts += 1;
            }

            let mut guard = self.messages.lock().unwrap();
            if let Some(limit) = self.accept_limit {
                if guard.len() >= limit {
                    return Err(WorkerError::ChannelUnavailable(
                        "recording channel closed".to_string(),
                    ));
                }
            }
            guard.push(message);
            Ok(())
        })
    }
}
