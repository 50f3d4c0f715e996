//! # rag-retrieval
//!
//! Query-time retrieval: embed the query, search the vector index, suppress
//! near-duplicates and return the top `k` passages.
//!
//! ## Overview
//!
//! - [`RetrievalPipeline`]: validates input, checks the result cache, checks a
//!   model out of the [`ModelCache`](rag_embeddings::ModelCache), embeds on the
//!   blocking pool, overfetches `k * overfetch_factor` candidates, applies the
//!   distance cut-off, dedups and truncates
//! - [`Deduplicator`]: single-pass near-duplicate suppression over a fuzzy
//!   string ratio of normalized passage text
//! - [`PassageSearch`]: async seam in front of a blocking
//!   [`VectorIndex`](rag_vector::VectorIndex)
//! - [`ResultCache`]: TTL-bounded LRU of recent results
//!
//! ## Example
//!
//! ```rust
//! use rag_retrieval::{fuzzy_ratio, Deduplicator};
//!
//! let dedup = Deduplicator::new(0.9);
//! assert!(dedup.is_duplicate(
//!     "Refunds are issued within 30 days of purchase.",
//!     "refunds are issued within 30 days of a purchase.",
//! ));
//! assert!(fuzzy_ratio("refund", "shipping") < 0.5);
//! ```

pub mod dedup;
pub mod error;
pub mod pipeline;
pub mod result_cache;
pub mod search;

pub use dedup::{
    fuzzy_ratio, normalize_text, Deduplicator, DEFAULT_DEDUP_THRESHOLD, MAX_COMPARED_CHARS,
};
pub use error::RetrievalError;
pub use pipeline::{PipelineConfig, Retrieval, RetrievalPipeline};
pub use result_cache::ResultCache;
pub use search::{BlockingSearch, PassageSearch};
