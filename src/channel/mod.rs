// src/channel/mod.rs

//! Outbound response channel abstraction.
//!
//! The worker talks to a `ResponseChannel` instead of a concrete transport.
//! Every send is bounded by a timeout: the deadline watchdog may force a
//! terminal response while the consumer is slow, and a job must never hang
//! on delivery.
//!
//! - [`MpscResponseChannel`] is the implementation used by the binary; it
//!   wraps a Tokio mpsc sender whose receiver feeds stdout.
//! - Tests provide their own `ResponseChannel` that records messages.

pub mod message;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::errors::{Result, WorkerError};

pub use message::{ResponseHeader, ResponseKind, ResponseMessage};

/// Trait abstracting where responses are delivered.
pub trait ResponseChannel: Send + Sync {
    /// Deliver one message, waiting at most `timeout` for capacity.
    ///
    /// Implementations report every delivery failure as
    /// `WorkerError::ChannelUnavailable`.
    fn send(
        &self,
        message: ResponseMessage,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Response channel backed by a bounded Tokio mpsc queue.
#[derive(Debug, Clone)]
pub struct MpscResponseChannel {
    tx: mpsc::Sender<ResponseMessage>,
}

impl MpscResponseChannel {
    /// Create the channel and the receiver its consumer drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ResponseMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl ResponseChannel for MpscResponseChannel {
    fn send(
        &self,
        message: ResponseMessage,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send_timeout(message, timeout)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => WorkerError::ChannelUnavailable(format!(
                        "queue full for {}ms",
                        timeout.as_millis()
                    )),
                    SendTimeoutError::Closed(_) => {
                        WorkerError::ChannelUnavailable("receiver closed".to_string())
                    }
                })
        })
    }
}
