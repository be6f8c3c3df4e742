//! One-shot jobs: one request line in, one result line out.

use crate::config::SessionConfig;
use crate::error::{CoreError, Result};
use cjbox_engine::{demux, Attachment, EngineError, LifecycleManager, Sandbox};
use cjbox_protocol::{JobRequest, JobResult};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Run `request` in a fresh auto-removing sandbox and decode its result.
///
/// The sandbox is torn down on every path, success or failure.
pub async fn run_job(
    lifecycle: &LifecycleManager,
    config: &SessionConfig,
    request: &JobRequest,
) -> Result<JobResult> {
    let session = Uuid::new_v4().to_string();
    let start = Instant::now();
    tracing::info!(session = %session, kind = %request.kind(), "Starting job");

    let mut sandbox = lifecycle
        .create(lifecycle.spec(&session).auto_remove(true))
        .await?;

    let result = drive(&mut sandbox, config, request).await;

    if let Err(e) = sandbox.teardown().await {
        tracing::warn!(sandbox_id = %sandbox.id(), error = %e, "Job sandbox teardown failed");
    }

    match &result {
        Ok(_) => tracing::info!(
            session = %session,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Job completed"
        ),
        Err(e) => tracing::warn!(
            session = %session,
            elapsed_ms = start.elapsed().as_millis() as u64,
            error = %e,
            "Job failed"
        ),
    }
    result
}

async fn drive(
    sandbox: &mut Sandbox,
    config: &SessionConfig,
    request: &JobRequest,
) -> Result<JobResult> {
    sandbox.start().await?;
    let Attachment { output, mut input } = sandbox.attach().await?;

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');

    // stdin is fed concurrently with draining so a chatty agent cannot deadlock the pipe
    let sandbox_id = sandbox.id().clone();
    let writer = tokio::spawn(async move {
        let written = async {
            input.write_all(&line).await?;
            input.shutdown().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!(sandbox_id = %sandbox_id, error = %e, "Job input write failed");
        }
    });

    let timeout = config.job_timeout;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let bounded = tokio::time::timeout(timeout, async {
        tokio::join!(
            demux(output, &mut stdout, &mut stderr),
            sandbox.wait_or_timeout(timeout)
        )
    })
    .await;
    writer.abort();

    let (drained, exit) = bounded.map_err(|_| EngineError::Timeout(timeout))?;
    drained?;

    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    match exit {
        Ok(mut status) if !status.success() => {
            tracing::warn!(
                sandbox_id = %sandbox.id(),
                exit_code = status.code,
                stderr = %stderr,
                "Agent failed"
            );
            status.stderr = Some(stderr);
            return Err(CoreError::AgentFailed(status));
        }
        Ok(_) => {}
        // auto-removal won the race against the wait call; the result line decides
        Err(EngineError::NotFound(_)) => {
            tracing::debug!(sandbox_id = %sandbox.id(), "Sandbox removed before exit was observed");
        }
        Err(e) => return Err(e.into()),
    }

    decode_result(&stdout, request, stderr)
}

fn decode_result(stdout: &[u8], request: &JobRequest, stderr: String) -> Result<JobResult> {
    let line = stdout
        .split(|b| *b == b'\n')
        .find(|line| !line.iter().all(u8::is_ascii_whitespace))
        .ok_or(CoreError::NoResult { stderr })?;

    let result: JobResult = serde_json::from_slice(line)?;
    if result.kind() != request.kind() {
        return Err(CoreError::UnexpectedResult {
            expected: request.kind(),
            actual: result.kind(),
        });
    }
    Ok(result)
}
