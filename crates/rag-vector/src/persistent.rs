//! On-disk index produced by ingestion.
//!
//! Layout under the store directory:
//! - `hnsw.usearch`: HNSW graph keyed by row key
//! - `passages/`: RocksDB passage rows and the index manifest
//!
//! Source references come from the separate meta index file when present.
//!
//! The query path opens the store read-only ([`PersistentIndex::open`]) and
//! picks up later ingestion through [`PersistentIndex::refresh`], which swaps
//! in a freshly loaded generation whenever the saved graph changes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use rag_embeddings::Embedding;
use rag_types::Passage;
use tracing::{debug, info};

use crate::error::VectorError;
use crate::hnsw::{HnswConfig, HnswIndex, HNSW_FILE};
use crate::index::{check_query, Distance, RetrievalCandidate, VectorIndex};
use crate::meta_index::MetaIndex;
use crate::store::{IndexManifest, PassageStore};

/// Sub-directory holding passage rows
pub const PASSAGES_DIR: &str = "passages";

/// Identity of a saved graph file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    Some(FileStamp {
        modified: meta.modified().ok()?,
        len: meta.len(),
    })
}

/// Graph and rows loaded together.
struct Generation {
    hnsw: HnswIndex,
    store: PassageStore,
    /// Graph file the generation was loaded from; `None` when writable
    stamp: Option<FileStamp>,
}

/// HNSW graph plus passage rows.
pub struct PersistentIndex {
    manifest: IndexManifest,
    current: RwLock<Arc<Generation>>,
    meta: MetaIndex,
    read_only: bool,
    next_key: AtomicU64,
    append_lock: Mutex<()>,
    root: PathBuf,
}

impl PersistentIndex {
    /// Open an index previously created by ingestion, read-only.
    ///
    /// Takes no lock on the store, so ingestion may keep appending.
    pub fn open(db_path: impl AsRef<Path>, meta_index_path: Option<&Path>) -> Result<Self, VectorError> {
        let root = db_path.as_ref().to_path_buf();
        let manifest = PassageStore::open_read_only(root.join(PASSAGES_DIR))?
            .manifest()?
            .ok_or_else(|| VectorError::NotInitialized(root.display().to_string()))?;

        let meta = match meta_index_path {
            Some(path) => MetaIndex::load(path)?,
            None => MetaIndex::default(),
        };

        let generation = Self::load_generation(&root, &manifest)?;
        Self::assemble(root, manifest, generation, meta, true)
    }

    /// Create (or reopen) an index for `manifest`, read-write. Used by ingestion tooling.
    pub fn create(db_path: impl AsRef<Path>, manifest: IndexManifest) -> Result<Self, VectorError> {
        let root = db_path.as_ref().to_path_buf();
        let store = PassageStore::open(root.join(PASSAGES_DIR))?;

        match store.manifest()? {
            Some(existing) if existing.model_id != manifest.model_id => {
                return Err(VectorError::ModelMismatch {
                    expected: existing.model_id,
                    actual: manifest.model_id,
                });
            }
            Some(existing) if existing.dimension != manifest.dimension => {
                return Err(VectorError::DimensionMismatch {
                    expected: existing.dimension,
                    actual: manifest.dimension,
                });
            }
            Some(_) => {}
            None => store.put_manifest(&manifest)?,
        }

        let hnsw = HnswIndex::open_or_create(hnsw_config(&manifest, &root))?;
        let generation = Generation {
            hnsw,
            store,
            stamp: None,
        };
        Self::assemble(root, manifest, generation, MetaIndex::default(), false)
    }

    /// Graph first, then rows, so every loaded vector's row is already logged.
    fn load_generation(root: &Path, manifest: &IndexManifest) -> Result<Generation, VectorError> {
        let stamp = file_stamp(&root.join(HNSW_FILE));
        let hnsw = HnswIndex::load(hnsw_config(manifest, root))?;
        let store = PassageStore::open_read_only(root.join(PASSAGES_DIR))?;
        Ok(Generation { hnsw, store, stamp })
    }

    fn assemble(
        root: PathBuf,
        manifest: IndexManifest,
        generation: Generation,
        meta: MetaIndex,
        read_only: bool,
    ) -> Result<Self, VectorError> {
        let next_key = if read_only {
            0
        } else {
            generation.store.next_key()?
        };

        info!(
            path = ?root,
            model = %manifest.model_id,
            dim = manifest.dimension,
            vectors = generation.hnsw.len(),
            read_only,
            "Opened persistent index"
        );

        Ok(Self {
            manifest,
            current: RwLock::new(Arc::new(generation)),
            meta,
            read_only,
            next_key: AtomicU64::new(next_key),
            append_lock: Mutex::new(()),
            root,
        })
    }

    fn generation(&self) -> Result<Arc<Generation>, VectorError> {
        self.current
            .read()
            .map(|g| Arc::clone(&g))
            .map_err(|_| VectorError::Index("generation lock poisoned".to_string()))
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Reload graph and rows if ingestion saved a new graph since the last load.
    ///
    /// Returns whether a new generation was swapped in. On error the current
    /// generation keeps serving.
    pub fn refresh(&self) -> Result<bool, VectorError> {
        if !self.read_only {
            return Ok(false);
        }
        let on_disk = file_stamp(&self.root.join(HNSW_FILE));
        if on_disk == self.generation()?.stamp {
            return Ok(false);
        }

        let next = Self::load_generation(&self.root, &self.manifest)?;
        let vectors = next.hnsw.len();
        *self
            .current
            .write()
            .map_err(|_| VectorError::Index("generation lock poisoned".to_string()))? = Arc::new(next);

        info!(path = ?self.root, vectors, "Reloaded persistent index");
        Ok(true)
    }

    /// Append a passage with its embedding.
    ///
    /// The row is written before the vector, so every searchable vector has a
    /// complete row behind it.
    pub fn append(&self, passage: &Passage) -> Result<u64, VectorError> {
        if self.read_only {
            return Err(VectorError::ReadOnly);
        }
        if passage.embedding.len() != self.manifest.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.manifest.dimension,
                actual: passage.embedding.len(),
            });
        }

        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| VectorError::Index("append lock poisoned".to_string()))?;
        let generation = self.generation()?;
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);

        generation.store.put(key, passage)?;
        generation.hnsw.add(key, &passage.embedding)?;
        Ok(key)
    }

    /// Flush the HNSW graph to disk.
    pub fn save(&self) -> Result<(), VectorError> {
        if self.read_only {
            return Err(VectorError::ReadOnly);
        }
        self.generation()?.hnsw.save()
    }
}

fn hnsw_config(manifest: &IndexManifest, root: &Path) -> HnswConfig {
    HnswConfig::new(manifest.dimension, manifest.metric, root)
}

impl VectorIndex for PersistentIndex {
    fn model_id(&self) -> &str {
        &self.manifest.model_id
    }

    fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    fn metric(&self) -> Distance {
        self.manifest.metric
    }

    fn len(&self) -> usize {
        self.generation().map(|g| g.hnsw.len()).unwrap_or(0)
    }

    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<RetrievalCandidate>, VectorError> {
        check_query(self, query, k)?;

        let generation = self.generation()?;
        let hits = generation.hnsw.search(&query.values, k)?;
        let mut candidates = Vec::with_capacity(hits.len());

        for (key, distance) in hits {
            let Some(mut passage) = generation.store.get(key)? else {
                debug!(key, "Skipping vector without a visible row");
                continue;
            };
            if let Some(source) = self.meta.source(&passage.doc_id) {
                passage.source = source.clone();
            }
            candidates.push(RetrievalCandidate::new(Arc::new(passage), distance));
        }

        Ok(candidates)
    }
}
