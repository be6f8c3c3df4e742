//! Interactive sessions: a client transport bridged to a language server sandbox.
//!
//! ```text
//!              ┌──────────────┐  JSON line   ┌─────────┐
//!  client ───▶ │ inbound pump │ ───────────▶ │         │
//!              └──────────────┘   (stdin)    │         │
//!              ┌──────────────┐              │ sandbox │
//!  client ◀─── │ writer/ping  │ ◀─ channel ─ │         │
//!              └──────────────┘   outbound   │         │
//!                                 pump ◀──── └─────────┘
//!                                      (demuxed stdout)
//! ```
//!
//! Three tasks share one [`CancellationToken`]. Whichever detects a problem
//! first (client gone, bad message, missed deadline) cancels it; the others
//! wind down, and the sandbox is torn down once all three have returned. A
//! sandbox that exits closes the outbound channel instead, so the writer
//! delivers its last messages before cancelling.

use crate::config::SessionConfig;
use crate::error::{CoreError, Result};
use bytes::Bytes;
use cjbox_engine::{
    demux, Attachment, InputSink, LifecycleManager, LineLogger, OutputStream, Sandbox,
};
use cjbox_protocol::{JobRequest, JsonLineCodec, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Prefix of language server sandbox names.
pub const LSP_NAME_PREFIX: &str = "cangjie-lsp-";

const PIPE_BUFFER: usize = 64 * 1024;

/// WebSocket close code for a server-side failure.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Why the server is closing the client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close code (RFC 6455 section 7.4).
    pub code: u16,
    /// Short human-readable explanation.
    pub reason: String,
}

/// Transport-neutral client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Text message carrying one JSON-RPC message.
    Text(String),
    /// Binary message carrying one JSON-RPC message.
    Binary(Bytes),
    /// Keep-alive ping.
    Ping(Bytes),
    /// Keep-alive answer.
    Pong(Bytes),
    /// Close handshake, with a reason when the session failed.
    Close(Option<CloseReason>),
}

/// What happened during a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session identifier.
    pub session: String,
    /// Messages forwarded from the client to the sandbox.
    pub messages_in: u64,
    /// Messages forwarded from the sandbox to the client.
    pub messages_out: u64,
    /// Wall time from sandbox creation to teardown.
    pub elapsed: Duration,
}

/// Random language server sandbox name.
pub fn lsp_sandbox_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{LSP_NAME_PREFIX}{}", &suffix[..8])
}

/// Bridge one client transport to a fresh language server sandbox.
///
/// Returns once the session has ended and its sandbox is torn down. `parent`
/// cancels the session from outside (server shutdown).
pub async fn run_session<S, K, RE>(
    lifecycle: &LifecycleManager,
    config: &SessionConfig,
    parent: &CancellationToken,
    stream: S,
    sink: K,
) -> Result<SessionSummary>
where
    S: Stream<Item = std::result::Result<ClientFrame, RE>> + Send + Unpin + 'static,
    RE: Display + Send + 'static,
    K: Sink<ClientFrame> + Send + Unpin + 'static,
    K::Error: Display + Send,
{
    let session = Uuid::new_v4().to_string();
    let start = Instant::now();
    let spec = lifecycle.spec(&session).named(lsp_sandbox_name());

    let mut sandbox = match lifecycle.create(spec).await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            close_with_error(sink, config).await;
            return Err(e.into());
        }
    };
    tracing::info!(session = %session, sandbox_id = %sandbox.id(), name = ?sandbox.name(), "Session opened");

    let attachment = match open(&mut sandbox, config).await {
        Ok(attachment) => attachment,
        Err(e) => {
            if let Err(teardown) = sandbox.teardown().await {
                tracing::warn!(sandbox_id = %sandbox.id(), error = %teardown, "Session teardown failed");
            }
            close_with_error(sink, config).await;
            return Err(e);
        }
    };

    let token = parent.child_token();
    let (frames_tx, frames_rx) = mpsc::channel(config.outbound_buffer);
    let sandbox_tag = sandbox.id().to_string();

    let writer = tokio::spawn(write_client(
        sink,
        frames_rx,
        config.clone(),
        token.clone(),
        sandbox_tag.clone(),
    ));
    let inbound = tokio::spawn(pump_inbound(
        stream,
        attachment.input,
        config.clone(),
        token.clone(),
        sandbox_tag.clone(),
    ));
    let outbound = tokio::spawn(pump_outbound(
        attachment.output,
        frames_tx,
        token.clone(),
        sandbox_tag,
    ));

    // single join point, then exactly one teardown
    let (writer, inbound, outbound) = tokio::join!(writer, inbound, outbound);
    token.cancel();
    let task_failed = |e: tokio::task::JoinError| {
        tracing::error!(sandbox_id = %sandbox.id(), error = %e, "Session task failed");
        0
    };
    if let Err(e) = writer {
        task_failed(e);
    }
    let messages_in = inbound.unwrap_or_else(task_failed);
    let messages_out = outbound.unwrap_or_else(task_failed);

    if let Err(e) = sandbox.teardown().await {
        tracing::warn!(sandbox_id = %sandbox.id(), error = %e, "Session teardown failed");
    }

    let summary = SessionSummary {
        session,
        messages_in,
        messages_out,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        session = %summary.session,
        messages_in = summary.messages_in,
        messages_out = summary.messages_out,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Session closed"
    );
    Ok(summary)
}

/// Tell the client the session could not be opened.
async fn close_with_error<K>(mut sink: K, config: &SessionConfig)
where
    K: Sink<ClientFrame> + Unpin,
{
    let frame = ClientFrame::Close(Some(CloseReason {
        code: CLOSE_INTERNAL_ERROR,
        reason: "sandbox unavailable".into(),
    }));
    // best effort: nothing more is owed to a client we could not serve
    let _ = tokio::time::timeout(config.write_wait, async {
        let _ = sink.send(frame).await;
        let _ = sink.close().await;
    })
    .await;
}

/// Start, attach and hand the agent its job.
async fn open(sandbox: &mut Sandbox, config: &SessionConfig) -> Result<Attachment> {
    sandbox.start().await?;
    let mut attachment = sandbox.attach().await?;

    let mut handoff = serde_json::to_vec(&JobRequest::Lsp)?;
    handoff.push(b'\n');
    tokio::time::timeout(config.write_wait, attachment.input.write_all(&handoff))
        .await
        .map_err(|_| CoreError::Transport("handoff write timed out".into()))??;
    Ok(attachment)
}

/// Sole owner of the client sink: forwards queued frames and pings on a timer.
async fn write_client<K>(
    mut sink: K,
    mut frames: mpsc::Receiver<ClientFrame>,
    config: SessionConfig,
    token: CancellationToken,
    sandbox: String,
) where
    K: Sink<ClientFrame> + Unpin,
    K::Error: Display,
{
    let first_ping = tokio::time::Instant::now() + config.ping_interval;
    let mut ticker = tokio::time::interval_at(first_ping, config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = ticker.tick() => ClientFrame::Ping(Bytes::new()),
        };

        match tokio::time::timeout(config.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(sandbox_id = %sandbox, error = %e, "Client write failed");
                token.cancel();
                break;
            }
            Err(_) => {
                tracing::warn!(sandbox_id = %sandbox, "Client write deadline exceeded");
                token.cancel();
                break;
            }
        }
    }

    // a closed queue means sandbox output was fully forwarded
    token.cancel();

    // best effort: the transport may already be gone
    let _ = tokio::time::timeout(config.write_wait, async {
        let _ = sink.send(ClientFrame::Close(None)).await;
        let _ = sink.close().await;
    })
    .await;
}

/// Client frames to sandbox stdin. Returns the number of messages forwarded.
async fn pump_inbound<S, RE>(
    mut stream: S,
    input: InputSink,
    config: SessionConfig,
    token: CancellationToken,
    sandbox: String,
) -> u64
where
    S: Stream<Item = std::result::Result<ClientFrame, RE>> + Unpin,
    RE: Display,
{
    let mut stdin = FramedWrite::new(input, JsonLineCodec::<Message>::new());
    let mut deadline = tokio::time::Instant::now() + config.pong_wait;
    let mut forwarded = 0u64;

    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(sandbox_id = %sandbox, "Client read deadline exceeded");
                token.cancel();
                break;
            }
            frame = stream.next() => frame,
        };

        let payload = match frame {
            Some(Ok(ClientFrame::Text(text))) => Bytes::from(text),
            Some(Ok(ClientFrame::Binary(bytes))) => bytes,
            Some(Ok(ClientFrame::Pong(_))) => {
                deadline = tokio::time::Instant::now() + config.pong_wait;
                continue;
            }
            Some(Ok(ClientFrame::Ping(_))) => continue,
            Some(Ok(ClientFrame::Close(_))) | None => {
                tracing::debug!(sandbox_id = %sandbox, "Client closed");
                token.cancel();
                break;
            }
            Some(Err(e)) => {
                tracing::debug!(sandbox_id = %sandbox, error = %e, "Client read failed");
                token.cancel();
                break;
            }
        };

        let message = match Message::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(sandbox_id = %sandbox, error = %e, "Invalid client message");
                token.cancel();
                break;
            }
        };
        tracing::trace!(sandbox_id = %sandbox, method = ?message.method(), "Client -> sandbox");

        let sent = tokio::select! {
            _ = token.cancelled() => break,
            sent = tokio::time::timeout(config.write_wait, stdin.send(message)) => sent,
        };
        match sent {
            Ok(Ok(())) => forwarded += 1,
            Ok(Err(e)) => {
                tracing::debug!(sandbox_id = %sandbox, error = %e, "Sandbox stdin write failed");
                token.cancel();
                break;
            }
            Err(_) => {
                tracing::warn!(sandbox_id = %sandbox, "Sandbox stdin write deadline exceeded");
                token.cancel();
                break;
            }
        }
    }

    let _ = tokio::time::timeout(config.write_wait, stdin.close()).await;
    forwarded
}

/// Sandbox stdout to client frames, stderr to the log. Returns the number of
/// messages forwarded.
async fn pump_outbound(
    output: OutputStream,
    frames: mpsc::Sender<ClientFrame>,
    token: CancellationToken,
    sandbox: String,
) -> u64 {
    let (pipe_in, pipe_out) = tokio::io::duplex(PIPE_BUFFER);
    let mut lines = FramedRead::new(pipe_out, JsonLineCodec::<Message>::new());
    let demuxer = demux(output, pipe_in, LineLogger::new(sandbox.clone()));

    let mut forwarded = 0u64;
    let forwarder = async {
        while let Some(line) = lines.next().await {
            let text = match line.and_then(|message| Ok(serde_json::to_string(&message)?)) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(sandbox_id = %sandbox, error = %e, "Invalid sandbox message");
                    token.cancel();
                    return;
                }
            };
            if frames.send(ClientFrame::Text(text)).await.is_err() {
                token.cancel();
                return;
            }
            forwarded += 1;
        }
    };

    tokio::select! {
        _ = token.cancelled() => {}
        (demuxed, ()) = async { tokio::join!(demuxer, forwarder) } => match demuxed {
            Ok(stats) => tracing::debug!(
                sandbox_id = %sandbox,
                stdout_bytes = stats.stdout_bytes,
                stderr_bytes = stats.stderr_bytes,
                "Sandbox output ended"
            ),
            Err(e) => tracing::debug!(sandbox_id = %sandbox, error = %e, "Sandbox output failed"),
        },
    }
    // closing the queue lets the writer flush what is left before it ends the session
    drop(frames);
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsp_sandbox_name() {
        let name = lsp_sandbox_name();
        assert!(name.starts_with(LSP_NAME_PREFIX));
        assert_eq!(name.len(), LSP_NAME_PREFIX.len() + 8);
        assert_ne!(name, lsp_sandbox_name());
    }
}
