//! # rag-embeddings
//!
//! Embedding models and the process-wide model cache for the RAG query
//! service.
//!
//! ## Features
//! - Local inference via Candle (no Python, no API)
//! - all-MiniLM-L6-v2 by default, any BERT-family checkpoint by repo id
//! - `hashing-<dim>` feature-hashing models for offline use
//! - [`ModelCache`]: single-flight loads, reference-counted checkout,
//!   TTL and capacity eviction that never touches a checked-out model

pub mod cache;
pub mod candle;
pub mod error;
pub mod files;
pub mod hashing;
pub mod loader;
pub mod model;

pub use crate::candle::CandleEmbedder;
pub use cache::{ModelCache, ModelCacheConfig, ModelCacheStats, ModelHandle};
pub use error::EmbeddingError;
pub use files::{get_or_download_model, ModelFiles, ModelPaths, DEFAULT_MODEL_REPO, MODEL_FILES};
pub use hashing::{HashingEmbedder, MAX_HASHING_DIMENSION};
pub use loader::{CandleLoader, HashingLoader, ModelLoader};
pub use model::{Embedding, EmbeddingModel, ModelInfo};
