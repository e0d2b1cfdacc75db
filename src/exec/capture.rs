// src/exec/capture.rs

//! Incremental output capture.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, warn};

use crate::errors::WorkerError;
use crate::types::StreamKind;

/// One read's worth of output from one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedChunk {
    pub stream: StreamKind,
    pub bytes: Vec<u8>,
}

/// Spawn a task reading `reader` in reads of at most `chunk_size` bytes and
/// forwarding each read to the job's sender loop, in order.
///
/// The task ends at EOF, on a read error (logged as a `StreamRead` error,
/// never propagated) or when the sender loop has gone away. It returns the
/// number of bytes forwarded.
pub fn spawn_capturer<R>(
    stream: StreamKind,
    reader: R,
    chunk_size: usize,
    tx: mpsc::Sender<CapturedChunk>,
    span: Span,
) -> JoinHandle<u64>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(capture_stream(stream, reader, chunk_size.max(1), tx).instrument(span))
}

async fn capture_stream<R>(
    stream: StreamKind,
    mut reader: R,
    chunk_size: usize,
    tx: mpsc::Sender<CapturedChunk>,
) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut total: u64 = 0;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(?stream, bytes = total, "stream reached end of output");
                break;
            }
            Ok(n) => {
                total += n as u64;
                let chunk = CapturedChunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    debug!(?stream, "sender loop gone; stopping capture");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let err = WorkerError::StreamRead(format!("{stream:?}: {e}"));
                warn!(?stream, error = %err, "treating stream as ended");
                break;
            }
        }
    }

    total
}
