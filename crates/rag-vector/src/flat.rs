//! Exact in-memory index.
//!
//! Brute-force search over an append-only passage list. Suitable for small
//! corpora and as the reference index in tests.

use std::sync::{Arc, RwLock};

use rag_embeddings::Embedding;
use rag_types::Passage;
use tracing::debug;

use crate::error::VectorError;
use crate::index::{check_query, Distance, RetrievalCandidate, VectorIndex};

/// Append-only exact-search index.
///
/// Each [`append`](FlatIndex::append) publishes a complete passage under the
/// write lock, so readers see either all of it or none of it.
#[derive(Debug)]
pub struct FlatIndex {
    model_id: String,
    dimension: usize,
    metric: Distance,
    passages: RwLock<Vec<Arc<Passage>>>,
}

impl FlatIndex {
    pub fn new(model_id: impl Into<String>, dimension: usize, metric: Distance) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
            metric,
            passages: RwLock::new(Vec::new()),
        }
    }

    /// Add a passage. Its embedding must match the index dimension.
    pub fn append(&self, passage: Passage) -> Result<(), VectorError> {
        if passage.embedding.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: passage.embedding.len(),
            });
        }

        let passage = Arc::new(passage);
        let mut passages = self
            .passages
            .write()
            .map_err(|_| VectorError::Index("passage list lock poisoned".to_string()))?;
        debug!(doc_id = %passage.doc_id, "Appended passage");
        passages.push(passage);
        Ok(())
    }

    /// Embed each passage's text with `model`, then append it.
    pub fn extend_embedded<I>(
        &self,
        model: &dyn rag_embeddings::EmbeddingModel,
        passages: I,
    ) -> Result<(), VectorError>
    where
        I: IntoIterator<Item = Passage>,
    {
        for passage in passages {
            let embedding = model
                .embed(&passage.text)
                .map_err(|e| VectorError::Index(format!("embedding failed: {e}")))?;
            self.append(passage.with_embedding(embedding.values))?;
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Distance {
        self.metric
    }

    fn len(&self) -> usize {
        self.passages.read().map(|p| p.len()).unwrap_or(0)
    }

    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<RetrievalCandidate>, VectorError> {
        check_query(self, query, k)?;

        // Snapshot so the lock is not held while scoring.
        let snapshot: Vec<Arc<Passage>> = self
            .passages
            .read()
            .map_err(|_| VectorError::Index("passage list lock poisoned".to_string()))?
            .clone();

        let mut scored: Vec<RetrievalCandidate> = snapshot
            .into_iter()
            .map(|p| {
                let distance = self.metric.between(&query.values, &p.embedding);
                RetrievalCandidate::new(p, distance)
            })
            .collect();

        // Stable: equal distances keep insertion order.
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);

        debug!(k, found = scored.len(), "Flat search complete");
        Ok(scored)
    }
}
