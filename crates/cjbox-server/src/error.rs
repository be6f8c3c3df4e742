//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cjbox_core::CoreError;
use thiserror::Error;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body was not valid UTF-8
    #[error("source must be valid UTF-8")]
    InvalidUtf8,

    /// Error from the playground backend
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    /// Status code sent to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidUtf8 => StatusCode::BAD_REQUEST,
            Self::Core(CoreError::Rejected(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request refused");
        }
        (status, self.to_string()).into_response()
    }
}
