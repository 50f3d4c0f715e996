//! Async access to a vector index.
//!
//! Index lookups are blocking. The pipeline awaits them through
//! [`PassageSearch`] so that a request timeout can abandon a slow search
//! without stalling the runtime.

use std::sync::Arc;

use async_trait::async_trait;
use rag_embeddings::Embedding;
use rag_vector::{RetrievalCandidate, VectorError, VectorIndex};

/// Trait for passage search backends.
#[async_trait]
pub trait PassageSearch: Send + Sync {
    /// Nearest passages, ascending distance.
    async fn search(
        &self,
        query: Embedding,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>, VectorError>;

    /// Model the indexed embeddings came from
    fn model_id(&self) -> &str;

    /// Searchable passage count
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs a [`VectorIndex`] on the blocking thread pool.
#[derive(Clone)]
pub struct BlockingSearch {
    index: Arc<dyn VectorIndex>,
}

impl BlockingSearch {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }
}

#[async_trait]
impl PassageSearch for BlockingSearch {
    async fn search(
        &self,
        query: Embedding,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>, VectorError> {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.search(&query, k))
            .await
            .map_err(|e| VectorError::Index(format!("search task failed: {e}")))?
    }

    fn model_id(&self) -> &str {
        self.index.model_id()
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
