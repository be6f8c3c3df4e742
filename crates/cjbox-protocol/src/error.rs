//! Error types for cjbox-protocol.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding or encoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload is not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is JSON but not a well-formed message
    #[error("invalid message: {0}")]
    Invalid(String),

    /// Malformed `Content-Length` frame header
    #[error("invalid frame header: {0}")]
    Header(String),

    /// Frame exceeds the configured size limit
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Size of the offending frame (or the bytes buffered so far)
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
