use crate::rate_limit::types::RateLimitInfo;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// `error` field of every rejection payload, whatever the configured status
pub const REJECTION_ERROR: &str = "Too Many Requests";

/// Result type for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Guard error types
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{message}")]
    TooManyRequests {
        status: StatusCode,
        message: String,
        info: RateLimitInfo,
    },

    #[error("Counter store error: {0}")]
    Store(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        GuardError::Store(err.to_string())
    }
}

impl GuardError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GuardError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GuardError::TooManyRequests { status, .. } => *status,
            GuardError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            GuardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GuardError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GuardError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is the quota-exceeded signal rather than a failure
    pub fn is_rejection(&self) -> bool {
        matches!(self, GuardError::TooManyRequests { .. })
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            GuardError::TooManyRequests { message, info, .. } => {
                let body = Json(json!({
                    "statusCode": status.as_u16(),
                    "message": message,
                    "error": REJECTION_ERROR,
                }));

                let mut response = (status, body).into_response();
                let headers = response.headers_mut();
                crate::rate_limit::middleware::write_quota_headers(headers, &info);
                headers.insert("Retry-After", HeaderValue::from(info.retry_after_secs()));
                response
            }
            other => {
                let body = Json(json!({
                    "error": other.to_string(),
                    "status": status.as_u16(),
                }));

                (status, body).into_response()
            }
        }
    }
}
