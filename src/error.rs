use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the counter/cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("script is not supported by this store")]
    UnsupportedScript,

    #[error("invalid cache value: {0}")]
    InvalidValue(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Anything that stops the service from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("Failed to connect to store: {0}")]
    Store(#[from] CacheError),

    #[error("Failed to create upstream client: {0}")]
    HttpClient(#[from] HttpClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the rate limiter core.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Rejected at route registration, never at request time.
    #[error("invalid rate limit configuration: {0}")]
    ConfigInvalid(String),

    #[error("rate limit store unavailable: {0}")]
    StoreUnavailable(#[from] CacheError),

    #[error("unexpected rate limit script reply: {0}")]
    ProtocolDecode(String),
}

/// Outbound HTTP failures.
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("invalid request url: {0}")]
    Url(String),

    #[error("executing request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status code: {status}, body: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum FinancialError {
    #[error("invalid digits: must be greater than 0")]
    InvalidDigits,

    #[error("ratio is undefined when profit is {0}")]
    UndefinedRatio(f64),
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Financial(#[from] FinancialError),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] HttpClientError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) | ApiError::Financial(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(_) | ApiError::RateLimit(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ErrorResponse::from_api_error(&self))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    /// Server-side failures get a generic message; details stay in the logs.
    pub fn from_api_error(err: &ApiError) -> Self {
        let code = err.status_code().as_u16();
        match err {
            ApiError::BadRequest(msg) => Self::new("bad_request", msg, code),
            ApiError::Validation(msg) => Self::new("validation_error", msg, code),
            ApiError::Financial(e) => Self::new("validation_error", &e.to_string(), code),
            ApiError::RateLimit(_) => {
                Self::new("rate_limit_error", "Rate limiting is temporarily unavailable", code)
            }
            ApiError::Upstream(_) | ApiError::Internal(_) => {
                Self::new("internal_error", "Internal server error", code)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
