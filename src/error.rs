/// Unified error types for the auth service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed input, invalid or expired one-time credentials, banned accounts
    #[error("{0}")]
    BadRequest(String),

    /// Request body failed field validation
    #[error("Validation failed")]
    Validation { details: Vec<String> },

    /// Missing or rejected credentials
    #[error("{message}")]
    Unauthorized {
        message: String,
        /// Per-strategy failures, in evaluation order
        details: Vec<String>,
    },

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Outbound collaborator errors (notification, verification)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();
        details.sort();
        ApiError::Validation { details }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Internal(_) | ApiError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error envelope returned to callers
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: u16,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

/// Convert ApiError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (name, message, error) = match self {
            ApiError::BadRequest(message) => ("BadRequest", message, None),
            ApiError::Validation { details } => (
                "ValidationFailed",
                "Validation failed".to_string(),
                Some(serde_json::json!(details)),
            ),
            ApiError::Unauthorized { message, details } => {
                let error = if details.is_empty() {
                    None
                } else {
                    Some(serde_json::json!(details))
                };
                ("Unauthorized", message, error)
            }
            ApiError::RateLimitExceeded { retry_after } => (
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
                Some(serde_json::json!({ "retry_after_secs": retry_after.as_secs() })),
            ),
            ApiError::Upstream(_) => (
                "UpstreamError",
                "Upstream service unavailable".to_string(),
                None,
            ),
            ApiError::Database(ref e) => {
                tracing::error!("database failure: {}", e);
                ("InternalServerError", "Internal server error".to_string(), None)
            }
            ApiError::Internal(ref e) => {
                tracing::error!("internal failure: {}", e);
                ("InternalServerError", "Internal server error".to_string(), None)
            }
            ApiError::Io(ref e) => {
                tracing::error!("io failure: {}", e);
                ("InternalServerError", "Internal server error".to_string(), None)
            }
        };

        let body = Json(ErrorResponse {
            status: "error".to_string(),
            code: status.as_u16(),
            name: name.to_string(),
            message,
            error,
        });

        (status, body).into_response()
    }
}

/// Result type alias for service operations
pub type ApiResult<T> = Result<T, ApiError>;
