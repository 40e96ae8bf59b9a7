//! REST error handling.
//!
//! The backend answers failures with `{ "error": "CODE", "message": "...", "request_id": "uuid" }`.
//! Status codes are mapped onto [`ErrorCode`]; the server's own code string is
//! kept alongside for display.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::AuthError;

/// Error categories derived from the HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Client errors (4xx)
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    TooManyRequests,

    // Server errors (5xx)
    InternalError,
    ServiceUnavailable,
    ExternalServiceError,

    Other,
}

impl ErrorCode {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => ErrorCode::BadRequest,
            StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
            StatusCode::FORBIDDEN => ErrorCode::Forbidden,
            StatusCode::NOT_FOUND => ErrorCode::NotFound,
            StatusCode::CONFLICT => ErrorCode::Conflict,
            StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::UnprocessableEntity,
            StatusCode::TOO_MANY_REQUESTS => ErrorCode::TooManyRequests,
            StatusCode::INTERNAL_SERVER_ERROR => ErrorCode::InternalError,
            StatusCode::SERVICE_UNAVAILABLE => ErrorCode::ServiceUnavailable,
            StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                ErrorCode::ExternalServiceError
            }
            _ => ErrorCode::Other,
        }
    }

    /// Get the string representation of the error code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::UnprocessableEntity => "unprocessable_entity",
            ErrorCode::TooManyRequests => "too_many_requests",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::ExternalServiceError => "external_service_error",
            ErrorCode::Other => "other",
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::InternalError
                | ErrorCode::ServiceUnavailable
                | ErrorCode::ExternalServiceError
        )
    }
}

/// The error envelope as sent by the backend
#[derive(Debug, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message} ({status})")]
    Remote {
        status: StatusCode,
        code: ErrorCode,
        server_code: Option<String>,
        message: String,
        request_id: Option<String>,
    },

    #[error("Unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("{0}")]
    Validation(String),
}

impl ApiError {
    /// Build an error from a non-success response body.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
        let message = envelope
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            });
        ApiError::Remote {
            status,
            code: ErrorCode::from_status(status),
            server_code: envelope.error,
            message,
            request_id: envelope.request_id,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Remote { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.status().map(ErrorCode::from_status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// The server's message without status decoration.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
