//! # rag-vector
//!
//! Nearest-neighbor lookup over the ingested passage corpus.
//!
//! ## Features
//! - [`VectorIndex`]: read-only search returning candidates by ascending distance
//! - [`FlatIndex`]: exact in-memory search with atomic appends
//! - [`PersistentIndex`]: usearch HNSW graph plus RocksDB passage rows
//! - [`MetaIndex`]: document source references written by ingestion
//!
//! Every index is tied to one embedding model and one distance metric; queries
//! from another model are rejected rather than compared.

pub mod error;
pub mod flat;
pub mod hnsw;
pub mod index;
pub mod meta_index;
pub mod persistent;
pub mod store;

pub use error::VectorError;
pub use flat::FlatIndex;
pub use hnsw::{HnswConfig, HnswIndex, HNSW_FILE};
pub use index::{check_query, Distance, IndexStats, RetrievalCandidate, VectorIndex};
pub use meta_index::MetaIndex;
pub use persistent::{PersistentIndex, PASSAGES_DIR};
pub use store::{IndexManifest, PassageStore, CF_INDEX_META, CF_PASSAGES};
