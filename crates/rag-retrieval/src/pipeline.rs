//! Query retrieval pipeline.
//!
//! check model → embed query → overfetch nearest passages → distance
//! cut-off → dedup → truncate to `k`.
//!
//! The model checkout is an RAII handle owned by the request future, so it is
//! returned on every exit path, including the future being dropped by a
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use rag_embeddings::{Embedding, EmbeddingError, ModelCache};
use rag_types::SharedClock;
use rag_vector::{RetrievalCandidate, VectorError};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::dedup::{Deduplicator, DEFAULT_DEDUP_THRESHOLD};
use crate::error::RetrievalError;
use crate::result_cache::ResultCache;
use crate::search::PassageSearch;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model used when the request does not name one
    pub default_model: String,
    /// Largest accepted `k`
    pub max_top_k: usize,
    /// Candidates requested per result slot, to survive dedup
    pub overfetch_factor: usize,
    pub dedup_threshold: f64,
    /// Drop candidates farther than this before dedup
    pub max_distance: Option<f32>,
    pub result_cache_ttl: Duration,
    pub result_cache_size: usize,
    /// Concurrent blocking computations (embedding, dedup)
    pub embed_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_model: rag_embeddings::DEFAULT_MODEL_REPO.to_string(),
            max_top_k: 50,
            overfetch_factor: 2,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            max_distance: None,
            result_cache_ttl: Duration::from_secs(300),
            result_cache_size: 256,
            embed_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// Ranked passages for one query.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub model_id: String,
    /// Ascending distance, at most `k`
    pub passages: Vec<RetrievalCandidate>,
    /// Served from the result cache
    pub cached: bool,
}

/// Orchestrates model checkout, search and dedup.
pub struct RetrievalPipeline {
    models: ModelCache,
    search: Arc<dyn PassageSearch>,
    dedup: Deduplicator,
    results: ResultCache,
    worker_permits: Arc<Semaphore>,
    config: PipelineConfig,
}

impl RetrievalPipeline {
    pub fn new(
        models: ModelCache,
        search: Arc<dyn PassageSearch>,
        config: PipelineConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            models,
            search,
            dedup: Deduplicator::new(config.dedup_threshold),
            results: ResultCache::new(config.result_cache_size, config.result_cache_ttl, clock),
            worker_permits: Arc::new(Semaphore::new(config.embed_workers.max(1))),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn models(&self) -> &ModelCache {
        &self.models
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    /// Searchable passage count.
    pub fn passage_count(&self) -> usize {
        self.search.len()
    }

    /// Reject malformed input before any work is done.
    pub fn validate(&self, query_text: &str, k: usize) -> Result<(), RetrievalError> {
        if query_text.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest("query text is empty".to_string()));
        }
        if k == 0 || k > self.config.max_top_k {
            return Err(RetrievalError::InvalidRequest(format!(
                "k must be between 1 and {}, got {}",
                self.config.max_top_k, k
            )));
        }
        Ok(())
    }

    /// Retrieve up to `k` distinct passages for `query_text`.
    #[instrument(skip(self, query_text))]
    pub async fn retrieve(
        &self,
        query_text: &str,
        k: usize,
        model_id: Option<&str>,
    ) -> Result<Retrieval, RetrievalError> {
        self.validate(query_text, k)?;
        let model_id = model_id.unwrap_or(&self.config.default_model);

        // Only the index's own model is ever loaded
        let indexed = self.search.model_id();
        if model_id != indexed {
            return Err(RetrievalError::InvalidRequest(format!(
                "index was built with {indexed}, not {model_id}"
            )));
        }

        if let Some(passages) = self.results.get(model_id, k, query_text) {
            debug!(count = passages.len(), "Result cache hit");
            return Ok(Retrieval {
                model_id: model_id.to_string(),
                passages,
                cached: true,
            });
        }

        let handle = self.models.acquire(model_id).await.map_err(|e| match e {
            EmbeddingError::InvalidInput(reason) => RetrievalError::InvalidRequest(reason),
            EmbeddingError::ModelUnavailable { model_id, reason } => {
                RetrievalError::ModelUnavailable { model_id, reason }
            }
            other => RetrievalError::ModelUnavailable {
                model_id: model_id.to_string(),
                reason: other.to_string(),
            },
        })?;

        let embedding = self.embed(&handle, query_text).await?;

        let fetch = k.saturating_mul(self.config.overfetch_factor.max(1));
        let candidates = self
            .search
            .search(embedding, fetch)
            .await
            .map_err(map_search_error)?;
        drop(handle);

        let fetched = candidates.len();
        let passages = self.rerank(candidates, k).await?;

        info!(fetched, returned = passages.len(), "Retrieval complete");
        self.results.put(model_id, k, query_text, &passages);

        Ok(Retrieval {
            model_id: model_id.to_string(),
            passages,
            cached: false,
        })
    }

    /// Embed the query on a blocking worker.
    async fn embed(
        &self,
        handle: &rag_embeddings::ModelHandle,
        query_text: &str,
    ) -> Result<Embedding, RetrievalError> {
        let model = Arc::clone(handle.model());
        let text = query_text.to_string();
        let embedded = self
            .run_blocking(move || model.embed(&text))
            .await
            .map_err(RetrievalError::EmbeddingFailed)?;

        embedded.map_err(|e| {
            warn!(error = %e, "Query embedding failed");
            RetrievalError::EmbeddingFailed(e.to_string())
        })
    }

    /// Distance cut-off, dedup and truncation on a blocking worker.
    async fn rerank(
        &self,
        candidates: Vec<RetrievalCandidate>,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
        let dedup = self.dedup;
        let max_distance = self.config.max_distance;

        self.run_blocking(move || {
            let within: Vec<RetrievalCandidate> = match max_distance {
                Some(max) => candidates.into_iter().filter(|c| c.distance <= max).collect(),
                None => candidates,
            };
            dedup.dedup_limited(within, k)
        })
        .await
        .map_err(RetrievalError::Internal)
    }

    /// Run CPU-bound work on the blocking pool, bounded by the worker permits.
    ///
    /// The awaiting request can be dropped (timeout) while the work finishes
    /// in the background.
    async fn run_blocking<T, F>(&self, work: F) -> Result<T, String>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.worker_permits)
            .acquire_owned()
            .await
            .map_err(|_| "blocking workers shut down".to_string())?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| format!("worker task failed: {e}"))
    }
}

fn map_search_error(e: VectorError) -> RetrievalError {
    match e {
        VectorError::ModelMismatch { expected, actual } => RetrievalError::InvalidRequest(format!(
            "index was built with {expected}, not {actual}"
        )),
        VectorError::InvalidArgument(reason) => RetrievalError::InvalidRequest(reason),
        other => {
            warn!(error = %other, "Vector search failed");
            RetrievalError::IndexUnavailable(other.to_string())
        }
    }
}
