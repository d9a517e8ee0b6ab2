//! Bounded byte pipe between a blocking writer and an async reader
//!
//! The writer half implements [`std::io::Write`] so it can sit under
//! `tar`/`flate2` on a blocking thread. The reader half implements
//! [`tokio::io::AsyncRead`]. At most `capacity` chunks are in flight; a write
//! beyond that blocks until the reader catches up.

use bytes::Bytes;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

/// Chunks buffered by [`pipe`] callers that have no better number.
pub const DEFAULT_CAPACITY: usize = 8;

type Chunk = io::Result<Bytes>;

/// Async read half of a [`pipe`].
pub type PipeReader = StreamReader<ReceiverStream<Chunk>, Bytes>;

/// Blocking write half of a [`pipe`].
///
/// Must not be used from inside an async task; run it on a blocking thread.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    tx: mpsc::Sender<Chunk>,
    failed: Arc<AtomicBool>,
}

/// Create a pipe buffering at most `capacity` written chunks.
#[must_use]
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let writer = PipeWriter {
        tx,
        failed: Arc::new(AtomicBool::new(false)),
    };
    (writer, StreamReader::new(ReceiverStream::new(rx)))
}

impl PipeWriter {
    /// Close the pipe with `err`.
    ///
    /// The reader sees everything written so far, then `err`. Later writes
    /// through any clone of this writer fail with `BrokenPipe` and are
    /// discarded.
    pub fn fail(&self, err: io::Error) {
        if self.failed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A gone reader has nobody to report to.
        let _ = self.tx.blocking_send(Err(err));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
