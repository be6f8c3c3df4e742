//! # cjbox-protocol
//!
//! Wire types shared by the cjbox host and the agent running inside each sandbox.
//!
//! ```text
//!  client ──ws frame──▶ host ──JSON line──▶ agent ──Content-Length──▶ LSPServer
//!         ◀─────────────      ◀────────────       ◀──────────────────
//! ```
//!
//! - [`JobRequest`] is the first line written to a sandbox's stdin. It selects the
//!   tool (`run`, `format` or `lsp`) and carries the source text.
//! - [`JobResult`] is the single line a one-shot job writes back before exiting.
//! - [`Message`] is a validated JSON-RPC 2.0 message. Interactive sessions relay
//!   these, one per line between host and agent ([`JsonLineCodec`]) and with
//!   `Content-Length` headers between agent and language server
//!   ([`ContentLengthCodec`]).

mod codec;
mod error;
mod job;
mod jsonrpc;

pub use codec::{ContentLengthCodec, JsonLineCodec, MAX_MESSAGE_BYTES};
pub use error::{ProtocolError, Result};
pub use job::{FormatResult, JobKind, JobRequest, JobResult, RunResult};
pub use jsonrpc::{Id, Message, ResponseOutcome, RpcError, JSONRPC_VERSION};
