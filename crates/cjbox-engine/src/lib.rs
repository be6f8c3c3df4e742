//! # cjbox-engine
//!
//! Container engine layer for cjbox sandboxes.
//! Provides a lifecycle abstraction over Docker (via bollard) and an in-memory
//! engine for tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cjbox_engine::{DockerEngine, LifecycleManager, SandboxPolicy};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> cjbox_engine::Result<()> {
//! let engine = Arc::new(DockerEngine::connect()?);
//! let policy = SandboxPolicy::builder().image("cangjie").memory_mib(512).build()?;
//! let lifecycle = LifecycleManager::new(engine, policy);
//!
//! let mut sandbox = lifecycle.create(lifecycle.spec("session-1").auto_remove(true)).await?;
//! sandbox.start().await?;
//! let attachment = sandbox.attach().await?;
//! let status = sandbox.wait_or_timeout(Duration::from_secs(5)).await;
//!
//! // always, whatever `status` says
//! sandbox.teardown().await?;
//! # drop((attachment, status));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Lifecycle Management**: create, start, attach, wait and idempotent teardown
//! - **Resource Policy**: memory ceiling, CPU share and `no-new-privileges` on every container
//! - **Leak Tracking**: `managed-by=cjbox` and per-session labels, listable through the engine
//! - **Demultiplexing**: split the attach stream into independent stdout and stderr sinks
//! - **Mock Engine**: scriptable in-memory containers for tests

mod config;
mod demux;
mod docker;
mod engine;
mod error;
mod mock;
mod sandbox;

pub use config::{
    SandboxPolicy, SandboxPolicyBuilder, SandboxSpec, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    SESSION_LABEL,
};
pub use demux::{demux, DemuxStats, LineLogger};
pub use docker::DockerEngine;
pub use engine::{
    Attachment, ContainerEngine, ContainerId, ContainerSummary, InputSink, OutputFrame,
    OutputStream,
};
pub use error::{EngineError, Result};
pub use mock::{FailAt, MockEngine, MockOutput, MockProcess, KILLED_EXIT_CODE};
pub use sandbox::{ExitStatus, LifecycleManager, Sandbox, SandboxState, DEFAULT_STOP_GRACE};
