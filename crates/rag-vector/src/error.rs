//! Vector index error types.

use thiserror::Error;

/// Errors that can occur during vector operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// usearch index error
    #[error("Index error: {0}")]
    Index(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Query embedding came from a different model than the indexed passages
    #[error("Model mismatch: index holds {expected}, query from {actual}")]
    ModelMismatch { expected: String, actual: String },

    /// Bad search argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// RocksDB error
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// Metadata index file unreadable
    #[error("Meta index error: {0}")]
    MetaIndex(String),

    /// Write attempted on an index opened for queries
    #[error("Index opened read-only")]
    ReadOnly,

    /// Store exists but was never initialized by ingestion
    #[error("Index not initialized: {0}")]
    NotInitialized(String),
}

impl From<serde_json::Error> for VectorError {
    fn from(e: serde_json::Error) -> Self {
        VectorError::Serialization(e.to_string())
    }
}
