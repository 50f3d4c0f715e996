//! Passage row storage.
//!
//! Maps HNSW keys (u64) to passage rows. Stored in RocksDB so that each row
//! becomes visible atomically. Ingestion owns the database read-write; the
//! query path opens it read-only and never takes its lock.

use std::path::Path;

use rag_types::Passage;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::VectorError;
use crate::index::Distance;

/// Column family for passage rows
pub const CF_PASSAGES: &str = "passages";

/// Column family for index-wide settings
pub const CF_INDEX_META: &str = "index_meta";

const MANIFEST_KEY: &[u8] = b"manifest";

/// Index-wide settings written once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Model that produced the stored embeddings
    pub model_id: String,
    pub dimension: usize,
    pub metric: Distance,
}

/// Passage rows in RocksDB.
pub struct PassageStore {
    db: DB,
}

impl PassageStore {
    /// Open or create passage storage.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_PASSAGES, Options::default()),
            ColumnFamilyDescriptor::new(CF_INDEX_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        info!(path = ?path, "Opened passage storage");
        Ok(Self { db })
    }

    /// Open existing passage storage without locking or modifying it.
    ///
    /// Sees everything the writer had logged at open time. A missing
    /// directory is `NotInitialized`; nothing is created.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(VectorError::NotInitialized(path.display().to_string()));
        }

        let db = DB::open_cf_for_read_only(
            &Options::default(),
            path,
            [CF_PASSAGES, CF_INDEX_META],
            false,
        )?;

        debug!(path = ?path, "Opened passage storage read-only");
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, VectorError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| VectorError::NotInitialized(format!("column family {name} missing")))
    }

    pub fn manifest(&self) -> Result<Option<IndexManifest>, VectorError> {
        match self.db.get_cf(self.cf(CF_INDEX_META)?, MANIFEST_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_manifest(&self, manifest: &IndexManifest) -> Result<(), VectorError> {
        let value = serde_json::to_vec(manifest)?;
        self.db.put_cf(self.cf(CF_INDEX_META)?, MANIFEST_KEY, value)?;
        Ok(())
    }

    /// Store a passage row. The embedding is not stored; it lives in the HNSW file.
    pub fn put(&self, key: u64, passage: &Passage) -> Result<(), VectorError> {
        let row = Passage {
            embedding: Vec::new(),
            ..passage.clone()
        };
        let value = serde_json::to_vec(&row)?;

        self.db.put_cf(self.cf(CF_PASSAGES)?, key.to_be_bytes(), value)?;
        debug!(key, doc_id = %passage.doc_id, "Stored passage row");
        Ok(())
    }

    /// Get a passage row by key.
    pub fn get(&self, key: u64) -> Result<Option<Passage>, VectorError> {
        match self.db.get_cf(self.cf(CF_PASSAGES)?, key.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Count stored rows
    pub fn count(&self) -> Result<usize, VectorError> {
        let iter = self.db.iterator_cf(self.cf(CF_PASSAGES)?, IteratorMode::Start);
        Ok(iter.count())
    }

    /// Get the next unused key
    pub fn next_key(&self) -> Result<u64, VectorError> {
        let mut iter = self.db.iterator_cf(self.cf(CF_PASSAGES)?, IteratorMode::End);

        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                let bytes: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| VectorError::Serialization("malformed passage key".to_string()))?;
                Ok(u64::from_be_bytes(bytes) + 1)
            }
            None => Ok(1), // Start from 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_types::SourceRef;
    use tempfile::TempDir;

    fn passage(id: &str) -> Passage {
        Passage::new(id, format!("text {id}"), SourceRef::new("a.pdf", 42))
    }

    #[test]
    fn test_put_and_get() {
        let temp = TempDir::new().unwrap();
        let store = PassageStore::open(temp.path()).unwrap();

        store.put(1, &passage("doc-1").with_embedding(vec![1.0, 2.0])).unwrap();

        let row = store.get(1).unwrap().unwrap();
        assert_eq!(row.doc_id, "doc-1");
        assert_eq!(row.source.offset, 42);
        assert!(row.embedding.is_empty());
        assert!(store.get(2).unwrap().is_none());
    }

    #[test]
    fn test_next_key() {
        let temp = TempDir::new().unwrap();
        let store = PassageStore::open(temp.path()).unwrap();

        assert_eq!(store.next_key().unwrap(), 1);
        store.put(42, &passage("p")).unwrap();
        assert_eq!(store.next_key().unwrap(), 43);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_read_only_beside_writer() {
        let temp = TempDir::new().unwrap();
        let writer = PassageStore::open(temp.path()).unwrap();
        writer.put(1, &passage("doc-1")).unwrap();

        let reader = PassageStore::open_read_only(temp.path()).unwrap();
        assert_eq!(reader.get(1).unwrap().unwrap().doc_id, "doc-1");
        assert!(reader.put(2, &passage("doc-2")).is_err());

        // The writer keeps working while the reader is open
        writer.put(2, &passage("doc-2")).unwrap();
        assert_eq!(writer.count().unwrap(), 2);
    }

    #[test]
    fn test_read_only_missing_path_not_created() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("passages");
        assert!(matches!(
            PassageStore::open_read_only(&missing),
            Err(VectorError::NotInitialized(_))
        ));
        assert!(!missing.exists());
    }

    #[test]
    fn test_manifest_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = PassageStore::open(temp.path()).unwrap();
        assert!(store.manifest().unwrap().is_none());

        let manifest = IndexManifest {
            model_id: "hashing-64".to_string(),
            dimension: 64,
            metric: Distance::Cosine,
        };
        store.put_manifest(&manifest).unwrap();
        assert_eq!(store.manifest().unwrap(), Some(manifest));
    }
}
