//! Corpus passages.
//!
//! Passages are produced by the ingestion collaborator and are read-only for
//! the life of the serving process.

use serde::{Deserialize, Serialize};

/// Where a passage came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source file name
    pub file: String,
    /// Byte offset of the chunk within the file
    pub offset: u64,
}

impl SourceRef {
    pub fn new(file: impl Into<String>, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }
}

/// A chunk of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Document identifier
    pub doc_id: String,
    /// Chunk text
    pub text: String,
    /// Source metadata
    #[serde(default)]
    pub source: SourceRef,
    /// Embedding computed at ingestion time (empty when held by the vector file)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Passage {
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>, source: SourceRef) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
            source,
            embedding: Vec::new(),
        }
    }

    /// Attach the precomputed embedding (builder pattern).
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}
