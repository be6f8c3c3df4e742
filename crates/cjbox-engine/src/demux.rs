//! Stream demultiplexing.
//!
//! The attach stream interleaves stdout and stderr frames. [`demux`] routes each
//! frame, in order and without loss, to one of two independent sinks.

use crate::engine::OutputFrame;
use crate::error::Result;
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Byte counts routed by [`demux`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Bytes written to the stdout sink.
    pub stdout_bytes: usize,
    /// Bytes written to the stderr sink.
    pub stderr_bytes: usize,
}

/// Route frames until the stream ends, then shut both sinks down.
///
/// Pass `&mut Vec<u8>` to buffer a stream fully, or an owned pipe half to feed
/// a reader that should see EOF when the container's output ends.
pub async fn demux<S, O, E>(mut frames: S, mut stdout: O, mut stderr: E) -> Result<DemuxStats>
where
    S: Stream<Item = Result<OutputFrame>> + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut stats = DemuxStats::default();
    while let Some(frame) = frames.next().await {
        match frame? {
            OutputFrame::Stdout(bytes) => {
                stdout.write_all(&bytes).await?;
                stats.stdout_bytes += bytes.len();
            }
            OutputFrame::Stderr(bytes) => {
                stderr.write_all(&bytes).await?;
                stats.stderr_bytes += bytes.len();
            }
        }
    }
    // readers on the other end see EOF
    stdout.shutdown().await?;
    stderr.shutdown().await?;
    Ok(stats)
}

/// Sink logging every complete line at debug level.
///
/// A trailing partial line is logged on shutdown.
#[derive(Debug)]
pub struct LineLogger {
    sandbox: String,
    pending: Vec<u8>,
}

impl LineLogger {
    /// Logger tagging lines with `sandbox`.
    pub fn new(sandbox: impl Into<String>) -> Self {
        Self {
            sandbox: sandbox.into(),
            pending: Vec::new(),
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            tracing::debug!(sandbox_id = %self.sandbox, line = %line, "sandbox stderr");
        }
    }
}

impl AsyncWrite for LineLogger {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        // never blocks: whole lines are logged, the rest waits for more input
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..pos]);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let rest = std::mem::take(&mut self.pending);
        self.emit(&rest);
        Poll::Ready(Ok(()))
    }
}
