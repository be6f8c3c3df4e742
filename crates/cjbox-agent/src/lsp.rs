//! Language server relay.
//!
//! Client messages arrive as JSON lines on the agent's stdin and leave as JSON
//! lines on its stdout. The language server speaks `Content-Length` framing on
//! its own pipes. Document notifications pass through the synchronizer first so
//! the working file is current before the server sees the change.

use crate::document::{DocumentSync, SyncOutcome};
use crate::error::{AgentError, Result, SpawnError};
use crate::toolchain::ToolchainConfig;
use cjbox_protocol::{ContentLengthCodec, JsonLineCodec, Message};
use futures::{SinkExt, StreamExt};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

const MANIFEST: &str = r#"[package]
  cjc-version = "0.53.13"
  name = "playground"
  description = "cjbox playground"
  version = "1.0.0"
  target-dir = ""
  src-dir = ""
  output-type = "executable"
  compile-option = ""
  link-option = ""
  override-compile-option = ""
  package-configuration = {}

[dependencies]
"#;

const MAIN_STUB: &str = "main(): Int64 {\n    return 0\n}\n";

/// How long an exiting server gets before it is killed.
const SERVER_EXIT_GRACE: Duration = Duration::from_secs(1);

/// Client side of the relay: decoded JSON lines in.
pub type ClientLines<R> = FramedRead<R, JsonLineCodec<Message>>;

/// Write the project skeleton the language server expects.
pub async fn scaffold(tools: &ToolchainConfig) -> Result<()> {
    tokio::fs::create_dir_all(tools.src_dir()).await?;
    tokio::fs::write(tools.manifest(), MANIFEST).await?;
    tokio::fs::write(tools.main_source(), MAIN_STUB).await?;
    Ok(())
}

/// Run the language server and relay until the client input ends, the server
/// stops or a document notification cannot be applied.
///
/// Client input ending is a normal shutdown; everything else is an error.
pub async fn relay<R, W>(tools: &ToolchainConfig, input: ClientLines<R>, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    scaffold(tools).await?;

    let program = tools.lsp_server.to_string_lossy().into_owned();
    let mut child = Command::new(&tools.lsp_server)
        .args(["src", "--disableAutoImport", "-V"])
        .current_dir(&tools.project_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SpawnError::Start {
            program: program.clone(),
            source,
        })?;
    info!(server = %program, pid = ?child.id(), "language server started");

    let (Some(stdin), Some(stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(SpawnError::Collect {
            program,
            source: std::io::Error::other("stdio pipes missing"),
        }
        .into());
    };

    // server diagnostics share the agent's stderr, which the host logs
    let diagnostics = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut stderr, &mut tokio::io::stderr()).await;
    });

    let mut sync = DocumentSync::new(tools.main_source());
    let result = tokio::select! {
        r = client_to_server(input, stdin, &mut sync) => r,
        r = server_to_client(stdout, output) => r,
        status = child.wait() => Err(AgentError::ServerStopped(match status {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        })),
    };

    match tokio::time::timeout(SERVER_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "language server exited"),
        _ => {
            warn!("language server still running, killing");
            let _ = child.kill().await;
        }
    }
    diagnostics.abort();

    match &result {
        Ok(()) => info!(
            uri = ?sync.uri(),
            version = sync.version(),
            path = %sync.path().display(),
            "relay finished"
        ),
        Err(e) => warn!(error = %e, "relay failed"),
    }
    result
}

async fn client_to_server<R>(
    mut input: ClientLines<R>,
    stdin: ChildStdin,
    sync: &mut DocumentSync,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut server = FramedWrite::new(stdin, ContentLengthCodec::new());
    while let Some(message) = input.next().await {
        let message = message?;
        trace!(method = ?message.method(), "client -> server");
        if sync.observe(&message).await? == SyncOutcome::Applied {
            trace!(version = sync.version(), "working file updated");
        }
        server.send(message).await?;
    }
    debug!("client input closed");
    // closing stdin lets the server shut down on its own
    let _ = server.close().await;
    Ok(())
}

async fn server_to_client<W>(stdout: ChildStdout, output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut server = FramedRead::new(stdout, ContentLengthCodec::new());
    let mut client = FramedWrite::new(output, JsonLineCodec::<Message>::new());
    while let Some(message) = server.next().await {
        let message = message?;
        trace!(method = ?message.method(), "server -> client");
        client.send(message).await?;
    }
    Err(AgentError::ServerStopped("output closed".into()))
}
