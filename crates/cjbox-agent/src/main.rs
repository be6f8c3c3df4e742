//! cjbox-agent: in-sandbox agent for cjbox playground containers.
//!
//! Reads one job descriptor line from stdin. `run` and `format` answer with a
//! single result line on stdout and exit; `lsp` relays JSON-RPC lines to the
//! language server until stdin closes. Logs go to stderr only, since stdout is
//! the protocol channel.

mod document;
mod error;
mod exec;
mod jobs;
mod lsp;
#[cfg(test)]
mod testutil;
mod toolchain;

use cjbox_protocol::{JobRequest, JobResult, JsonLineCodec, Message};
use error::AgentError;
use futures::{SinkExt, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use toolchain::ToolchainConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cjbox_agent=debug")),
        )
        .init();

    let tools = ToolchainConfig::from_env();
    tools.validate()?;

    let mut input = FramedRead::new(tokio::io::stdin(), JsonLineCodec::<JobRequest>::new());
    let job = input.next().await.ok_or(AgentError::NoJob)??;
    info!(kind = %job.kind(), "job received");

    let result = match job {
        JobRequest::Run { source } => JobResult::Run(jobs::run(&tools, &source).await?),
        JobRequest::Format { source } => JobResult::Format(jobs::format(&tools, &source).await?),
        JobRequest::Lsp => {
            // bytes already buffered past the job line belong to the relay
            let parts = input.into_parts();
            let mut lines = FramedRead::new(parts.io, JsonLineCodec::<Message>::new());
            *lines.read_buffer_mut() = parts.read_buf;
            lsp::relay(&tools, lines, tokio::io::stdout()).await?;
            return Ok(());
        }
    };

    let mut output = FramedWrite::new(tokio::io::stdout(), JsonLineCodec::<JobResult>::new());
    output.send(result).await?;
    info!("result reported");
    Ok(())
}
