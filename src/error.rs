use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::models::response::ApiResponse;

/// Decides whether a failure is worth another attempt.
///
/// Retry loops stop at the first non-retryable error, and circuit breakers only
/// count retryable failures against a dependency.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        !self.is::<CircuitOpenError>()
    }
}

/// Fast-fail signal from an open circuit breaker. The guarded call never ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open for {dependency}")]
pub struct CircuitOpenError {
    pub dependency: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("broker rejected message for routing key {routing_key}")]
    Rejected { routing_key: String },

    #[error("failed to encode queue message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<lapin::Error> for PublishError {
    fn from(e: lapin::Error) -> Self {
        PublishError::Connection(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("failed to queue notification: {0}")]
    Publish(#[from] PublishError),

    #[error("idempotency/status store error: {0}")]
    Store(#[from] StoreError),

    #[error("notification status not found")]
    NotFound,
}

impl GatewayError {
    pub fn validation(reason: impl Into<String>) -> Self {
        GatewayError::Validation(vec![reason.into()])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Publish(_) | GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error, message) = match &self {
            GatewayError::Validation(reasons) => (
                Value::from(reasons.clone()),
                "Request validation failed.".to_string(),
            ),
            GatewayError::Publish(_) => (
                Value::from(self.to_string()),
                "Failed to queue notification.".to_string(),
            ),
            GatewayError::Store(_) => (
                Value::from(self.to_string()),
                "Idempotency store unavailable.".to_string(),
            ),
            GatewayError::NotFound => (
                Value::from(self.to_string()),
                "Status not found or expired.".to_string(),
            ),
        };

        (status, Json(ApiResponse::<Value>::error(error, message))).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("malformed queue message: {0}")]
    Malformed(String),

    #[error("{dependency} temporarily unavailable: {reason}")]
    Transient { dependency: String, reason: String },

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl DeliveryError {
    pub fn transient(dependency: &str, reason: impl Into<String>) -> Self {
        DeliveryError::Transient {
            dependency: dependency.to_string(),
            reason: reason.into(),
        }
    }

    /// Maps an HTTP failure status from a collaborator or provider.
    pub fn from_status(dependency: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let reason = if body.is_empty() {
            format!("{} returned status {}", dependency, status)
        } else {
            format!("{} returned status {}: {}", dependency, status, body)
        };

        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            DeliveryError::transient(dependency, reason)
        } else {
            DeliveryError::Permanent(reason)
        }
    }

    /// Network-level failures (connect, timeout, reset) are always transient.
    pub fn from_transport(dependency: &str, e: reqwest::Error) -> Self {
        if e.is_decode() {
            DeliveryError::Permanent(format!("{} sent an undecodable body: {}", dependency, e))
        } else {
            DeliveryError::transient(dependency, e.to_string())
        }
    }
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient { .. })
    }
}
