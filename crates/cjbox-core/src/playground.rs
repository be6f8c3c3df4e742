//! Service facade combining admission, one-shot jobs and interactive sessions.

use crate::admission::AdmissionGate;
use crate::config::SessionConfig;
use crate::error::{CoreError, Result};
use crate::oneshot::run_job;
use crate::session::{run_session, ClientFrame, SessionSummary};
use cjbox_engine::{EngineError, LifecycleManager, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use cjbox_protocol::{FormatResult, JobKind, JobRequest, JobResult, RunResult};
use futures::{Sink, Stream};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Counters for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct PlaygroundStats {
    /// Requests admitted by the gate.
    pub admitted: AtomicU64,
    /// Requests rejected by the gate.
    pub rejected: AtomicU64,
    /// One-shot jobs that produced a result.
    pub jobs_completed: AtomicU64,
    /// One-shot jobs that failed in orchestration.
    pub jobs_failed: AtomicU64,
    /// Interactive sessions currently open.
    pub active_sessions: AtomicU64,
}

/// Point-in-time copy of [`PlaygroundStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Requests admitted by the gate.
    pub admitted: u64,
    /// Requests rejected by the gate.
    pub rejected: u64,
    /// One-shot jobs that produced a result.
    pub jobs_completed: u64,
    /// One-shot jobs that failed in orchestration.
    pub jobs_failed: u64,
    /// Interactive sessions currently open.
    pub active_sessions: u64,
}

impl PlaygroundStats {
    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active session gauge when dropped.
struct SessionGuard(Arc<PlaygroundStats>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The playground backend.
///
/// Cheap to clone; clones share the engine, the gate, the counters and the
/// shutdown token.
#[derive(Clone)]
pub struct Playground {
    lifecycle: LifecycleManager,
    gate: Arc<AdmissionGate>,
    config: SessionConfig,
    shutdown: CancellationToken,
    stats: Arc<PlaygroundStats>,
}

impl Playground {
    /// Create a playground.
    pub fn new(lifecycle: LifecycleManager, gate: AdmissionGate, config: SessionConfig) -> Self {
        Self {
            lifecycle,
            gate: Arc::new(gate),
            config,
            shutdown: CancellationToken::new(),
            stats: Arc::new(PlaygroundStats::default()),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Counters.
    pub fn stats(&self) -> &PlaygroundStats {
        &self.stats
    }

    /// Token whose cancellation ends every open session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every open session.
    pub fn shutdown(&self) {
        tracing::info!(
            active_sessions = self.stats.active_sessions.load(Ordering::Relaxed),
            "Cancelling open sessions"
        );
        self.shutdown.cancel();
    }

    /// Run the admission check.
    pub async fn admit(&self) -> Result<()> {
        match self.gate.admit().await {
            Ok(()) => {
                self.stats.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Compile and run `source`.
    pub async fn run(&self, source: String) -> Result<RunResult> {
        match self.job(JobRequest::Run { source }).await? {
            JobResult::Run(result) => Ok(result),
            other => Err(unexpected(JobKind::Run, &other)),
        }
    }

    /// Format `source`.
    pub async fn format(&self, source: String) -> Result<FormatResult> {
        match self.job(JobRequest::Format { source }).await? {
            JobResult::Format(result) => Ok(result),
            other => Err(unexpected(JobKind::Format, &other)),
        }
    }

    async fn job(&self, request: JobRequest) -> Result<JobResult> {
        self.admit().await?;
        // a job result with a failed compile still counts as completed
        let result = run_job(&self.lifecycle, &self.config, &request).await;
        let counter = match result {
            Ok(_) => &self.stats.jobs_completed,
            Err(_) => &self.stats.jobs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Serve one already-admitted language server session.
    pub async fn serve_lsp<S, K, RE>(&self, stream: S, sink: K) -> Result<SessionSummary>
    where
        S: Stream<Item = std::result::Result<ClientFrame, RE>> + Send + Unpin + 'static,
        RE: Display + Send + 'static,
        K: Sink<ClientFrame> + Send + Unpin + 'static,
        K::Error: Display + Send,
    {
        self.stats.active_sessions.fetch_add(1, Ordering::Relaxed);
        let _guard = SessionGuard(Arc::clone(&self.stats));
        run_session(&self.lifecycle, &self.config, &self.shutdown, stream, sink).await
    }

    /// Remove containers left behind by an earlier process.
    ///
    /// Returns how many were removed.
    pub async fn sweep_leaked(&self) -> Result<usize> {
        let engine = self.lifecycle.engine();
        let leaked = engine
            .list_by_label(MANAGED_BY_LABEL, MANAGED_BY_VALUE)
            .await?;

        // Leaked containers may still be running, remove forces them
        let mut removed = 0;
        for container in leaked {
            match engine.remove(&container.id).await {
                Ok(()) | Err(EngineError::NotFound(_)) => {
                    tracing::info!(sandbox_id = %container.id, name = ?container.name, "Removed leaked sandbox");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(sandbox_id = %container.id, error = %e, "Failed to remove leaked sandbox");
                }
            }
        }
        Ok(removed)
    }
}

fn unexpected(expected: JobKind, result: &JobResult) -> CoreError {
    CoreError::UnexpectedResult {
        expected,
        actual: result.kind(),
    }
}
