//! Retrieval error types.

use thiserror::Error;

/// Failures of one retrieval. Each variant is a distinct stage.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Empty query, `k` out of range, or a model the index was not built with
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The embedding model could not be loaded
    #[error("Model {model_id} unavailable: {reason}")]
    ModelUnavailable { model_id: String, reason: String },

    /// The model failed to embed the query
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The vector store failed
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// A blocking worker task died
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RetrievalError {
    /// Whether the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RetrievalError::ModelUnavailable { .. } | RetrievalError::IndexUnavailable(_)
        )
    }
}
