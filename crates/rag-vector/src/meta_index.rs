//! Document metadata index.
//!
//! A JSON file written by ingestion mapping document ids to their source:
//!
//! ```json
//! { "doc-1": { "file": "policy.pdf", "offset": 1024 } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use rag_types::SourceRef;
use tracing::{info, warn};

use crate::error::VectorError;

/// Source references by document id.
#[derive(Debug, Clone, Default)]
pub struct MetaIndex {
    entries: HashMap<String, SourceRef>,
}

impl MetaIndex {
    /// Load the file at `path`. A missing file yields an empty index.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = ?path, "Meta index file not found; sources come from passage rows");
            return Ok(Self::default());
        }

        let bytes = std::fs::read(path)?;
        let entries: HashMap<String, SourceRef> = serde_json::from_slice(&bytes)
            .map_err(|e| VectorError::MetaIndex(format!("{}: {}", path.display(), e)))?;

        info!(path = ?path, documents = entries.len(), "Loaded meta index");
        Ok(Self { entries })
    }

    pub fn source(&self, doc_id: &str) -> Option<&SourceRef> {
        self.entries.get(doc_id)
    }

    pub fn insert(&mut self, doc_id: impl Into<String>, source: SourceRef) {
        self.entries.insert(doc_id.into(), source);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the index as JSON, replacing the file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VectorError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
