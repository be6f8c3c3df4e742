//! Sandbox lifecycle: create, start, attach, wait and guaranteed teardown.

use crate::config::{SandboxPolicy, SandboxSpec};
use crate::engine::{Attachment, ContainerEngine, ContainerId};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default grace period between stop and kill.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(1);

/// Current state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Container exists but was never started.
    Created,
    /// Container started, stdio not attached yet.
    Started,
    /// Stdio attached, container not started yet.
    Attached,
    /// Started and attached.
    Running,
    /// Container exited.
    Exited,
    /// Container torn down.
    Removed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Attached => write!(f, "attached"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// How a container finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code reported by the engine.
    pub code: i64,
    /// Captured stderr, filled in by callers that buffer it for non-zero exits.
    pub stderr: Option<String>,
}

impl ExitStatus {
    /// Whether the container exited with code 0.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Creates sandboxes against an injected engine and policy.
#[derive(Clone)]
pub struct LifecycleManager {
    engine: Arc<dyn ContainerEngine>,
    policy: SandboxPolicy,
    stop_grace: Duration,
}

impl LifecycleManager {
    /// Manager creating sandboxes from `policy` on `engine`.
    pub fn new(engine: Arc<dyn ContainerEngine>, policy: SandboxPolicy) -> Self {
        Self {
            engine,
            policy,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Override the stop grace period used by teardown.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// The deployment policy.
    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// The shared engine client.
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Spec for a new sandbox owned by `session`.
    pub fn spec(&self, session: &str) -> SandboxSpec {
        SandboxSpec::new(self.policy.clone(), session)
    }

    /// Create a sandbox without starting it.
    ///
    /// # Errors
    /// Returns [`EngineError::Create`] when the engine rejects the spec. No
    /// container exists in that case.
    pub async fn create(&self, spec: SandboxSpec) -> Result<Sandbox> {
        let start = Instant::now();
        let session = spec.session().unwrap_or_default().to_string();
        tracing::debug!(
            session = %session,
            name = ?spec.name,
            image = %spec.policy.image,
            memory_bytes = spec.policy.memory_bytes,
            auto_remove = spec.auto_remove,
            "Creating sandbox"
        );

        let id = self.engine.create(&spec).await.map_err(|e| {
            tracing::error!(session = %session, error = %e, "Sandbox creation failed");
            e
        })?;

        tracing::info!(
            sandbox_id = %id,
            session = %session,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox created"
        );

        Ok(Sandbox {
            id,
            name: spec.name,
            session,
            engine: Arc::clone(&self.engine),
            stop_grace: self.stop_grace,
            state: SandboxState::Created,
            torn_down: Arc::new(AtomicBool::new(false)),
            created_at: Utc::now(),
        })
    }
}

/// One container owned by one session.
///
/// Call [`Sandbox::teardown`] on every path. A sandbox dropped without teardown
/// schedules one on the current tokio runtime.
pub struct Sandbox {
    id: ContainerId,
    name: Option<String>,
    session: String,
    engine: Arc<dyn ContainerEngine>,
    stop_grace: Duration,
    state: SandboxState,
    torn_down: Arc<AtomicBool>,
    created_at: DateTime<Utc>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("session", &self.session)
            .field("state", &self.state())
            .finish()
    }
}

impl Sandbox {
    /// Engine-assigned identifier.
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Container name, if one was requested.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Session that owns this sandbox.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Current state.
    pub fn state(&self) -> SandboxState {
        if self.torn_down.load(Ordering::Acquire) {
            SandboxState::Removed
        } else {
            self.state
        }
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Start the container.
    ///
    /// # Errors
    /// Returns [`EngineError::Start`]. The sandbox has been torn down by the
    /// time the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_state(&[SandboxState::Created, SandboxState::Attached])?;
        if let Err(e) = self.engine.start(&self.id).await {
            tracing::error!(sandbox_id = %self.id, error = %e, "Sandbox start failed");
            self.teardown().await.ok();
            return Err(e);
        }
        // attach may already have happened (LSP sessions attach first)
        self.state = match self.state {
            SandboxState::Attached => SandboxState::Running,
            _ => SandboxState::Started,
        };
        tracing::debug!(sandbox_id = %self.id, "Sandbox started");
        Ok(())
    }

    /// Attach to the container's stdio, replaying output produced so far.
    pub async fn attach(&mut self) -> Result<Attachment> {
        self.ensure_state(&[SandboxState::Created, SandboxState::Started])?;
        let attachment = self.engine.attach(&self.id).await.map_err(|e| {
            tracing::error!(sandbox_id = %self.id, error = %e, "Sandbox attach failed");
            e
        })?;
        self.state = match self.state {
            SandboxState::Started => SandboxState::Running,
            _ => SandboxState::Attached,
        };
        tracing::debug!(sandbox_id = %self.id, "Sandbox attached");
        Ok(attachment)
    }

    /// Wait for the container to stop running, bounded by `timeout`.
    ///
    /// The sandbox is left in place on timeout; callers still tear it down.
    pub async fn wait_or_timeout(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let code = match tokio::time::timeout(timeout, self.engine.wait(&self.id)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(sandbox_id = %self.id, timeout_ms = timeout.as_millis() as u64, "Sandbox timed out");
                return Err(EngineError::Timeout(timeout));
            }
        };
        self.state = SandboxState::Exited;
        tracing::debug!(sandbox_id = %self.id, exit_code = code, "Sandbox exited");
        Ok(ExitStatus { code, stderr: None })
    }

    /// Stop and remove the container.
    ///
    /// Idempotent: only the first call reaches the engine. A missing container
    /// counts as already removed.
    pub async fn teardown(&self) -> Result<()> {
        // Drop shares the flag, so at most one teardown is ever issued
        if self.torn_down.swap(true, Ordering::AcqRel) {
            tracing::trace!(sandbox_id = %self.id, "Sandbox already torn down");
            return Ok(());
        }
        teardown_container(self.engine.as_ref(), &self.id, self.stop_grace).await
    }

    fn ensure_state(&self, allowed: &[SandboxState]) -> Result<()> {
        let state = self.state();
        if !allowed.contains(&state) {
            return Err(EngineError::InvalidState {
                expected: allowed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" | "),
                actual: state.to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(sandbox_id = %self.id, "Sandbox dropped without teardown, scheduling one");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = Arc::clone(&self.engine);
                let id = self.id.clone();
                let grace = self.stop_grace;
                handle.spawn(async move {
                    let _ = teardown_container(engine.as_ref(), &id, grace).await;
                });
            }
            Err(_) => {
                tracing::error!(sandbox_id = %self.id, "No runtime to tear down sandbox, container leaked");
            }
        }
    }
}

async fn teardown_container(
    engine: &dyn ContainerEngine,
    id: &ContainerId,
    grace: Duration,
) -> Result<()> {
    let start = Instant::now();
    tracing::debug!(sandbox_id = %id, "Tearing down sandbox");

    // 1. Stop with a grace period
    match engine.stop(id, grace).await {
        Ok(()) => {}
        Err(EngineError::NotFound(_)) => {
            tracing::debug!(sandbox_id = %id, "Sandbox already removed");
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(sandbox_id = %id, error = %e, "Graceful stop failed, forcing removal");
        }
    }

    // 2. Remove, even when stop failed
    match engine.remove(id).await {
        Ok(()) | Err(EngineError::NotFound(_)) => {
            tracing::info!(
                sandbox_id = %id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Sandbox removed"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(sandbox_id = %id, error = %e, "Sandbox removal failed");
            Err(e)
        }
    }
}
