//! HNSW vector file using usearch.
//!
//! Parameters tuned for quality over speed:
//! - M = 16 (connections per layer)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 100 (search-time quality)

use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::VectorError;
use crate::index::Distance;

/// File name of the HNSW graph inside the store directory
pub const HNSW_FILE: &str = "hnsw.usearch";

/// HNSW index configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Embedding dimension (must match model)
    pub dimension: usize,
    pub metric: Distance,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Directory holding the index file
    pub index_path: PathBuf,
    /// Initial reservation; grows on demand
    pub capacity: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 384, // all-MiniLM-L6-v2
            metric: Distance::Cosine,
            connectivity: 16,
            expansion_add: 200,
            expansion_search: 100,
            index_path: PathBuf::from("./vector-index"),
            capacity: 1024,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize, metric: Distance, index_path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            metric,
            index_path: index_path.into(),
            ..Default::default()
        }
    }

    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.connectivity = m;
        self
    }

    pub fn with_expansion(mut self, ef_add: usize, ef_search: usize) -> Self {
        self.expansion_add = ef_add;
        self.expansion_search = ef_search;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn options(&self) -> IndexOptions {
        IndexOptions {
            dimensions: self.dimension,
            metric: match self.metric {
                Distance::Cosine => MetricKind::Cos,
                Distance::L2 => MetricKind::L2sq,
            },
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false, // Single vector per key
        }
    }
}

/// HNSW graph keyed by passage row key.
pub struct HnswIndex {
    index: RwLock<Index>,
    config: HnswConfig,
}

impl HnswIndex {
    /// Create a new HNSW index or open existing one.
    pub fn open_or_create(config: HnswConfig) -> Result<Self, VectorError> {
        let index_file = config.index_path.join(HNSW_FILE);
        let options = config.options();

        let index = if index_file.exists() {
            info!(path = ?index_file, "Opening existing vector index");
            let idx = Index::new(&options).map_err(|e| VectorError::Index(e.to_string()))?;
            idx.load(path_str(&index_file)?)
                .map_err(|e| VectorError::Index(format!("Failed to load: {}", e)))?;
            if idx.dimensions() != config.dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: config.dimension,
                    actual: idx.dimensions(),
                });
            }
            idx
        } else {
            info!(path = ?index_file, dim = config.dimension, metric = %config.metric, "Creating new vector index");
            std::fs::create_dir_all(&config.index_path)?;
            let idx = Index::new(&options).map_err(|e| VectorError::Index(e.to_string()))?;
            idx.reserve(config.capacity.max(1))
                .map_err(|e| VectorError::Index(e.to_string()))?;
            idx
        };

        Ok(Self {
            index: RwLock::new(index),
            config,
        })
    }

    /// Load a saved graph without creating anything on disk.
    ///
    /// A missing file yields an empty in-memory graph.
    pub fn load(config: HnswConfig) -> Result<Self, VectorError> {
        let index_file = config.index_path.join(HNSW_FILE);
        let index = Index::new(&config.options()).map_err(|e| VectorError::Index(e.to_string()))?;

        if index_file.exists() {
            index
                .load(path_str(&index_file)?)
                .map_err(|e| VectorError::Index(format!("Failed to load: {}", e)))?;
            if index.dimensions() != config.dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: config.dimension,
                    actual: index.dimensions(),
                });
            }
        }

        Ok(Self {
            index: RwLock::new(index),
            config,
        })
    }

    /// Get the index file path
    pub fn index_file(&self) -> PathBuf {
        self.config.index_path.join(HNSW_FILE)
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn metric(&self) -> Distance {
        self.config.metric
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Index>, VectorError> {
        self.index
            .read()
            .map_err(|_| VectorError::Index("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Index>, VectorError> {
        self.index
            .write()
            .map_err(|_| VectorError::Index("index lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.read().map(|i| i.size()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: u64) -> bool {
        self.read().map(|i| i.contains(key)).unwrap_or(false)
    }

    /// Add a vector under `key`, growing the reservation when full.
    #[allow(clippy::readonly_write_lock)] // usearch::Index uses interior mutability
    pub fn add(&self, key: u64, values: &[f32]) -> Result<(), VectorError> {
        if values.len() != self.config.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.config.dimension,
                actual: values.len(),
            });
        }

        let index = self.write()?;
        if index.size() + 1 > index.capacity() {
            let grown = (index.capacity() * 2).max(self.config.capacity).max(16);
            index
                .reserve(grown)
                .map_err(|e| VectorError::Index(e.to_string()))?;
        }
        index
            .add(key, values)
            .map_err(|e| VectorError::Index(e.to_string()))?;

        debug!(key, "Added vector");
        Ok(())
    }

    /// Nearest keys with distances, ascending. L2 distances are Euclidean.
    pub fn search(&self, values: &[f32], k: usize) -> Result<Vec<(u64, f32)>, VectorError> {
        if values.len() != self.config.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.config.dimension,
                actual: values.len(),
            });
        }

        let index = self.read()?;
        if index.size() == 0 {
            return Ok(Vec::new());
        }
        let results = index
            .search(values, k)
            .map_err(|e| VectorError::Index(e.to_string()))?;

        let metric = self.config.metric;
        let hits: Vec<(u64, f32)> = results
            .keys
            .iter()
            .zip(results.distances.iter())
            .map(|(&key, &dist)| match metric {
                Distance::Cosine => (key, dist),
                Distance::L2 => (key, dist.max(0.0).sqrt()),
            })
            .collect();

        debug!(k, found = hits.len(), "HNSW search complete");
        Ok(hits)
    }

    /// Save index to disk.
    ///
    /// Written to a temporary file and renamed over the old one, so readers
    /// never load a half-written graph.
    pub fn save(&self) -> Result<(), VectorError> {
        let index = self.read()?;
        let path = self.index_file();
        let staging = path.with_extension("usearch.tmp");
        index
            .save(path_str(&staging)?)
            .map_err(|e| VectorError::Index(format!("Failed to save: {}", e)))?;
        std::fs::rename(&staging, &path)?;

        info!(path = ?path, vectors = index.size(), "Saved vector index");
        Ok(())
    }
}

fn path_str(path: &std::path::Path) -> Result<&str, VectorError> {
    path.to_str()
        .ok_or_else(|| VectorError::Index("Invalid path encoding".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn random_vector(dim: usize) -> Vec<f32> {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..dim).map(|_| rng.random::<f32>() + 0.01).collect()
    }

    #[test]
    fn test_create_index() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(384, Distance::Cosine, temp.path());
        let index = HnswIndex::open_or_create(config).unwrap();
        assert_eq!(index.dimension(), 384);
        assert!(index.is_empty());
    }

    #[test]
    fn test_add_and_search_ascending() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(32, Distance::Cosine, temp.path()).with_capacity(4);
        let index = HnswIndex::open_or_create(config).unwrap();

        // More than the initial reservation
        for key in 0..20 {
            index.add(key, &random_vector(32)).unwrap();
        }
        assert_eq!(index.len(), 20);

        let results = index.search(&random_vector(32), 5).unwrap();
        assert_eq!(results.len(), 5);
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn test_l2_distance_is_euclidean() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(2, Distance::L2, temp.path());
        let index = HnswIndex::open_or_create(config).unwrap();
        index.add(7, &[3.0, 4.0]).unwrap();

        let hits = index.search(&[0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].0, 7);
        assert!((hits[0].1 - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_search_empty() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(8, Distance::Cosine, temp.path())).unwrap();
        assert!(index.search(&random_vector(8), 3).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(16, Distance::Cosine, temp.path()).with_capacity(100);

        {
            let index = HnswIndex::open_or_create(config.clone()).unwrap();
            for key in 0..5 {
                index.add(key, &random_vector(16)).unwrap();
            }
            index.save().unwrap();
        }

        let index = HnswIndex::open_or_create(config).unwrap();
        assert_eq!(index.len(), 5);
        assert!(index.contains(3));
    }

    #[test]
    fn test_load_missing_file_is_empty_and_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("absent");
        let index = HnswIndex::load(HnswConfig::new(8, Distance::Cosine, &dir)).unwrap();
        assert!(index.is_empty());
        assert!(!dir.exists());
    }

    #[test]
    fn test_save_leaves_no_staging_file() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(4, Distance::Cosine, temp.path())).unwrap();
        index.add(1, &random_vector(4)).unwrap();
        index.save().unwrap();

        assert!(index.index_file().exists());
        assert!(!temp.path().join("hnsw.usearch.tmp").exists());
        assert_eq!(HnswIndex::load(HnswConfig::new(4, Distance::Cosine, temp.path())).unwrap().len(), 1);
    }

    #[test]
    fn test_dimension_mismatch() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(16, Distance::Cosine, temp.path())).unwrap();
        assert!(matches!(
            index.add(0, &random_vector(8)),
            Err(VectorError::DimensionMismatch { .. })
        ));
    }
}
