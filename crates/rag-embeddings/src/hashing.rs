//! Lexical feature-hashing embedder.
//!
//! Maps lower-cased word tokens into a fixed number of signed buckets. It has
//! no model files, so it backs offline deployments and tests. Model ids of the
//! form `hashing-<dim>` resolve to it.

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingModel, ModelInfo};

const PREFIX: &str = "hashing-";

/// Largest dimension a `hashing-<dim>` id may name
pub const MAX_HASHING_DIMENSION: usize = 4096;

/// Bag-of-words embedder using the hashing trick.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    info: ModelInfo,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            info: ModelInfo {
                name: format!("{PREFIX}{dimension}"),
                dimension: dimension.max(1),
                max_sequence_length: usize::MAX,
            },
        }
    }

    /// Parse `hashing-<dim>`, with `dim` in `1..=MAX_HASHING_DIMENSION`.
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        let dim: usize = model_id.strip_prefix(PREFIX)?.parse().ok()?;
        (1..=MAX_HASHING_DIMENSION)
            .contains(&dim)
            .then(|| Self::new(dim))
    }
}

/// FNV-1a, stable across processes and platforms.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl EmbeddingModel for HashingEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut values = vec![0.0f32; self.info.dimension];
        let lowered = text.to_lowercase();

        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.info.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }

        Ok(Embedding::new(self.info.name.clone(), values))
    }
}
