//! Error types for cjbox-agent.

use crate::document::Position;
use thiserror::Error;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// A tool process could not be run at all.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The program could not be started
    #[error("failed to start {program}: {source}")]
    Start {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// The program started but its pipes or exit status could not be read
    #[error("failed to collect {program}: {source}")]
    Collect {
        /// Program whose output was lost
        program: String,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Document synchronization fault. Ends the language server relay.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An edit range ends before it starts
    #[error("edit range ends at {end} before it starts at {start}")]
    InvertedRange {
        /// Range start
        start: Position,
        /// Range end
        end: Position,
    },

    /// Notification parameters do not match the expected shape
    #[error("malformed {method} params: {source}")]
    Params {
        /// Notification method
        method: &'static str,
        /// Decode error
        source: serde_json::Error,
    },

    /// The buffer could not be written to the working file
    #[error("failed to persist document: {0}")]
    Persist(#[from] std::io::Error),
}

/// Errors that end an agent job.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No job line arrived before stdin closed
    #[error("stdin closed before a job was received")]
    NoJob,

    /// Malformed wire message
    #[error("protocol error: {0}")]
    Protocol(#[from] cjbox_protocol::ProtocolError),

    /// Tool process failure outside a reported pipeline stage
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Document synchronization fault
    #[error("document sync error: {0}")]
    Sync(#[from] SyncError),

    /// Language server exited or closed its output
    #[error("language server stopped: {0}")]
    ServerStopped(String),

    /// Invalid toolchain configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
