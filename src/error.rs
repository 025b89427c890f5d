//! Application error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// External service a request was delegated to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Upstream {
    /// YouTube timed-text captions.
    Captions,
    /// Google result-page search.
    Search,
    /// Hugging Face hub and hosted inference.
    Inference,
    /// A running daemon, as seen from [`crate::client::DaemonClient`].
    Daemon,
}

impl Upstream {
    /// Returns the wire-format code used in error payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Captions => "captions_unavailable",
            Self::Search => "search_unavailable",
            Self::Inference => "inference_failed",
            Self::Daemon => "daemon_unavailable",
        }
    }
}

/// Error model used by configuration, collaborators, and request handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Upstream { service: Upstream, message: String },
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Creates a `400 Bad Request` error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a `404 Not Found` error for missing captions, models, or ids.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a `502 Bad Gateway` error for a failing collaborator.
    pub fn upstream(service: Upstream, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
        }
    }

    /// Creates a generic internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, code) = match &self {
            AppError::InvalidRequest(_) => ("invalid_request_error", None),
            AppError::NotFound(_) => ("not_found_error", None),
            AppError::Upstream { service, .. } => ("upstream_error", Some(service.as_str())),
            AppError::Internal(_) => ("server_error", Some("internal_error")),
        };
        let payload = ErrorPayload {
            error: ErrorBody {
                message: self.to_string(),
                error_type,
                code,
            },
        };

        (status, Json(payload)).into_response()
    }
}
