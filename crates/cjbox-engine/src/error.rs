//! Error types for cjbox-engine.

use thiserror::Error;

/// Result type alias for cjbox-engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected the container spec
    #[error("failed to create container: {0}")]
    Create(String),

    /// Failed to start the container
    #[error("failed to start container: {0}")]
    Start(String),

    /// Failed to attach to the container's stdio
    #[error("failed to attach to container: {0}")]
    Attach(String),

    /// Failed waiting for the container to exit
    #[error("failed to wait for container: {0}")]
    Wait(String),

    /// Failed to stop the container
    #[error("failed to stop container: {0}")]
    Stop(String),

    /// Failed to remove the container
    #[error("failed to remove container: {0}")]
    Remove(String),

    /// Container does not exist (already removed)
    #[error("container not found: {0}")]
    NotFound(String),

    /// Attached stream failed mid-transfer
    #[error("attached stream error: {0}")]
    Stream(String),

    /// Sandbox is not in expected state
    #[error("invalid sandbox state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Docker API error not attributable to a lifecycle step
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout waiting for operation
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
