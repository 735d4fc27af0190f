//! Error types for the chat relay.
//!
//! Every error carries an HTTP status and a stable code. Only
//! [`Error::public_message`] is ever shown to callers; the `Display` form may
//! contain upstream or internal detail and goes to logs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the relay.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed request input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Shared secret absent or wrong
    #[error("Unauthorized")]
    Unauthorized,

    /// The completion API call failed
    #[error("Upstream error (status {status:?}): {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid-request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Check if this is an upstream error.
    pub const fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }

    /// Get HTTP status code for this error.
    ///
    /// Upstream errors reuse the upstream status when it is a 4xx/5xx.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::Unauthorized => 401,
            Self::Upstream {
                status: Some(code), ..
            } if *code >= 400 && *code <= 599 => *code,
            _ => 500,
        }
    }

    /// Stable machine-readable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Message that is safe to return to callers.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidRequest(message) => message.clone(),
            Self::Unauthorized => "Unauthorized".into(),
            Self::Upstream { .. } => "Upstream completion request failed".into(),
            _ => "Internal server error".into(),
        }
    }

    /// Body returned to callers for this error.
    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.public_message(),
            code: self.code().into(),
        }
    }
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() || self.is_upstream() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, axum::Json(self.to_response_body())).into_response()
    }
}
