//! Vector index trait and types.
//!
//! Defines the interface for nearest-neighbor lookup over corpus passages.

use std::fmt;
use std::sync::Arc;

use rag_embeddings::Embedding;
use rag_types::Passage;
use serde::{Deserialize, Serialize};

use crate::error::VectorError;

/// Distance metric, fixed when an index is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    /// `1 - cosine similarity`, in `[0, 2]`
    #[default]
    Cosine,
    /// Euclidean distance
    L2,
}

impl Distance {
    /// Distance between two vectors of equal length. Lower is more similar.
    pub fn between(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
            Distance::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Cosine => write!(f, "cosine"),
            Distance::L2 => write!(f, "l2"),
        }
    }
}

/// A passage matched by one query.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub passage: Arc<Passage>,
    /// Lower = more similar
    pub distance: f32,
}

impl RetrievalCandidate {
    pub fn new(passage: Arc<Passage>, distance: f32) -> Self {
        Self { passage, distance }
    }

    pub fn text(&self) -> &str {
        &self.passage.text
    }
}

/// Index statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    /// Number of searchable passages
    pub passage_count: usize,
    /// Embedding dimension
    pub dimension: usize,
    /// Model that produced the indexed embeddings
    pub model_id: String,
    pub metric: Distance,
}

/// Trait for vector indexes.
///
/// Read-only from the query path. Implementations must be thread-safe for
/// concurrent reads while ingestion appends.
pub trait VectorIndex: Send + Sync {
    /// Model whose embeddings this index holds
    fn model_id(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    fn metric(&self) -> Distance;

    /// Get the number of passages in the index
    fn len(&self) -> usize;

    /// Check if the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Search for the k nearest passages.
    ///
    /// Results are sorted by ascending distance. Fewer than `k` are returned
    /// when the index holds fewer passages.
    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<RetrievalCandidate>, VectorError>;

    fn stats(&self) -> IndexStats {
        IndexStats {
            passage_count: self.len(),
            dimension: self.dimension(),
            model_id: self.model_id().to_string(),
            metric: self.metric(),
        }
    }
}

/// Reject queries that cannot be answered by `index`.
pub fn check_query<I: VectorIndex + ?Sized>(
    index: &I,
    query: &Embedding,
    k: usize,
) -> Result<(), VectorError> {
    if k == 0 {
        return Err(VectorError::InvalidArgument("k must be at least 1".to_string()));
    }
    if query.model_id != index.model_id() {
        return Err(VectorError::ModelMismatch {
            expected: index.model_id().to_string(),
            actual: query.model_id.clone(),
        });
    }
    if query.dimension() != index.dimension() {
        return Err(VectorError::DimensionMismatch {
            expected: index.dimension(),
            actual: query.dimension(),
        });
    }
    Ok(())
}
