//! Embedding model trait and types.
//!
//! Defines the interface for generating vector embeddings from text.

use crate::error::EmbeddingError;

/// Vector embedding - a normalized float array tagged with its model.
///
/// Embeddings from different models live in different spaces and are never
/// compared with each other.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// Identifier of the model that produced this vector
    pub model_id: String,
    /// The embedding vector (normalized to unit length)
    pub values: Vec<f32>,
}

impl Embedding {
    /// Create a new embedding from a vector.
    /// Normalizes the vector to unit length.
    pub fn new(model_id: impl Into<String>, values: Vec<f32>) -> Self {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let normalized = if norm > 0.0 {
            values.iter().map(|x| x / norm).collect()
        } else {
            values
        };
        Self {
            model_id: model_id.into(),
            values: normalized,
        }
    }

    /// Create embedding without normalization (for pre-normalized vectors)
    pub fn from_normalized(model_id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            model_id: model_id.into(),
            values,
        }
    }

    /// Get the embedding dimension
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Whether two embeddings share a model and dimension.
    pub fn is_comparable(&self, other: &Embedding) -> bool {
        self.model_id == other.model_id && self.values.len() == other.values.len()
    }

    /// Cosine similarity with another embedding of the same model.
    /// Returns `None` when the embeddings are not comparable.
    pub fn cosine_similarity(&self, other: &Embedding) -> Option<f32> {
        if !self.is_comparable(other) {
            return None;
        }
        // Since both are normalized, dot product = cosine similarity
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| a * b)
                .sum(),
        )
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model identifier (e.g., "sentence-transformers/all-MiniLM-L6-v2")
    pub name: String,
    /// Embedding dimension
    pub dimension: usize,
    /// Maximum sequence length in tokens
    pub max_sequence_length: usize,
}

/// Trait for embedding models.
///
/// Implementations must be thread-safe (Send + Sync) for concurrent use.
pub trait EmbeddingModel: Send + Sync {
    /// Get model information
    fn info(&self) -> &ModelInfo;

    /// Generate embedding for a single text.
    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Generate embeddings for multiple texts (batch).
    /// Default implementation calls embed() for each text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Relative memory weight of the loaded model, reported in cache stats.
    fn weight(&self) -> usize {
        self.info().dimension
    }
}
