//! # cjbox-core
//!
//! Orchestration layer for the cjbox playground.
//!
//! This crate decides whether a request may run, spawns the sandbox that runs
//! it and moves bytes between the caller and the agent inside.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    cjbox-core (host)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │   Playground    │────▶│  AdmissionGate           │    │
//! │  │   - run()       │     │  (MemoryProbe, 512 MiB)  │    │
//! │  │   - format()    │     └──────────────────────────┘    │
//! │  │   - serve_lsp() │                                     │
//! │  └─────────────────┘                                     │
//! │       │         │                                        │
//! │       ▼         ▼                                        │
//! │  ┌─────────┐ ┌─────────────┐   ┌──────────────────────┐  │
//! │  │ run_job │ │ run_session │──▶│  LifecycleManager    │  │
//! │  └─────────┘ └─────────────┘   │  (from cjbox-engine) │  │
//! │                                └──────────────────────┘  │
//! │                                          │ stdin/stdout  │
//! └──────────────────────────────────────────┼───────────────┘
//!                                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  cjbox-agent (container)                 │
//! │         first stdin line selects run, format or lsp      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use cjbox_core::{AdmissionGate, Playground, SessionConfig, SysinfoProbe};
//! use cjbox_engine::{DockerEngine, LifecycleManager, SandboxPolicy};
//! use std::sync::Arc;
//!
//! # async fn example() -> cjbox_core::Result<()> {
//! let engine = Arc::new(DockerEngine::connect()?);
//! let lifecycle = LifecycleManager::new(engine, SandboxPolicy::default());
//! let gate = AdmissionGate::new(Arc::new(SysinfoProbe::new()), 512 * 1024 * 1024);
//! let playground = Playground::new(lifecycle, gate, SessionConfig::default());
//!
//! let result = playground.run("main() { println(\"hi\") }".into()).await?;
//! println!("{:?}", result.bin_output);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Admission Control**: serialized host memory check before any sandbox exists
//! - **One-shot Jobs**: run and format with a hard wall-clock bound
//! - **Interactive Sessions**: JSON-RPC bridge with ping/pong liveness and write deadlines
//! - **Guaranteed Teardown**: every sandbox is stopped and removed exactly once
//! - **Leak Sweep**: remove labelled containers left over from a previous process

mod admission;
mod config;
mod error;
mod oneshot;
mod playground;
mod session;

pub use admission::{
    AdmissionGate, MemoryProbe, StaticProbe, SysinfoProbe, DEFAULT_MIN_AVAILABLE_BYTES,
};
pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::{CoreError, Result};
pub use oneshot::run_job;
pub use playground::{Playground, PlaygroundStats, StatsSnapshot};
pub use session::{
    lsp_sandbox_name, run_session, ClientFrame, CloseReason, SessionSummary, CLOSE_INTERNAL_ERROR,
    LSP_NAME_PREFIX,
};
