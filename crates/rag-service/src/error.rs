//! Service error taxonomy and its HTTP mapping.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rag_admission::AuthError;
use rag_retrieval::RetrievalError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a request was not served.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Rate limited; retry after {}s", retry_after_secs(*.retry_after))]
    RateLimited { retry_after: Duration },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Seconds to advertise in `Retry-After`, rounded up, at least one.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl ServiceError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Unauthenticated => "unauthenticated",
            ServiceError::RateLimited { .. } => "rate_limited",
            ServiceError::ModelUnavailable(_) => "model_unavailable",
            ServiceError::EmbeddingFailed(_) => "embedding_failed",
            ServiceError::IndexUnavailable(_) => "index_unavailable",
            ServiceError::Timeout(_) => "timeout",
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::ModelUnavailable(_)
            | ServiceError::EmbeddingFailed(_)
            | ServiceError::IndexUnavailable(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::ModelUnavailable(_)
                | ServiceError::IndexUnavailable(_)
                | ServiceError::Timeout(_)
        )
    }
}

impl From<RetrievalError> for ServiceError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::InvalidRequest(msg) => ServiceError::InvalidRequest(msg),
            RetrievalError::ModelUnavailable { model_id, reason } => {
                ServiceError::ModelUnavailable(format!("{model_id}: {reason}"))
            }
            RetrievalError::EmbeddingFailed(msg) => ServiceError::EmbeddingFailed(msg),
            RetrievalError::IndexUnavailable(msg) => ServiceError::IndexUnavailable(msg),
            RetrievalError::Internal(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => ServiceError::Unauthenticated,
            AuthError::SessionsDisabled => ServiceError::InvalidRequest(err.to_string()),
            AuthError::Issue(msg) => ServiceError::Internal(msg),
        }
    }
}

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&ServiceError> for ErrorBody {
    fn from(err: &ServiceError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(ErrorBody::from(&self))).into_response();

        if let ServiceError::RateLimited { retry_after } = &self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(*retry_after)),
            );
        }

        response
    }
}
