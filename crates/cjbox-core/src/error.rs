//! Error types for cjbox-core.

use cjbox_engine::ExitStatus;
use cjbox_protocol::JobKind;
use thiserror::Error;

/// Result type alias for cjbox-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while orchestrating a job or session.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Admission gate refused the request
    #[error("admission rejected: {0}")]
    Rejected(String),

    /// Error from cjbox-engine
    #[error("engine error: {0}")]
    Engine(#[from] cjbox_engine::EngineError),

    /// Malformed wire message
    #[error("protocol error: {0}")]
    Protocol(#[from] cjbox_protocol::ProtocolError),

    /// Agent exited with a non-zero status
    #[error("agent exited with status {}", .0.code)]
    AgentFailed(ExitStatus),

    /// Agent exited without writing a result line
    #[error("agent produced no result")]
    NoResult {
        /// Whatever the agent wrote to stderr
        stderr: String,
    },

    /// Agent answered with a result for a different job
    #[error("expected {expected} result, got {actual}")]
    UnexpectedResult {
        /// Kind of the submitted job
        expected: JobKind,
        /// Kind of the received result
        actual: JobKind,
    },

    /// Host memory could not be read
    #[error("memory probe failed: {0}")]
    Probe(String),

    /// Client transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
