//! Model loaders.
//!
//! A [`ModelLoader`] turns a model identifier into a loaded model object. The
//! [`ModelCache`](crate::ModelCache) calls it at most once concurrently per
//! identifier, on the blocking thread pool.

use std::sync::Arc;

use crate::candle::CandleEmbedder;
use crate::error::EmbeddingError;
use crate::files::ModelFiles;
use crate::hashing::HashingEmbedder;
use crate::model::EmbeddingModel;

/// Loads embedding models by identifier. Loading may block.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_id: &str) -> Result<Arc<dyn EmbeddingModel>, EmbeddingError>;
}

/// Loads HuggingFace sentence-transformer checkpoints through Candle.
#[derive(Debug, Clone, Default)]
pub struct CandleLoader {
    files: ModelFiles,
}

impl CandleLoader {
    pub fn new(files: ModelFiles) -> Self {
        Self { files }
    }
}

impl ModelLoader for CandleLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn EmbeddingModel>, EmbeddingError> {
        if let Some(model) = HashingEmbedder::from_model_id(model_id) {
            return Ok(Arc::new(model));
        }
        let embedder = CandleEmbedder::load(&self.files, model_id)?;
        Ok(Arc::new(embedder))
    }
}

/// Loads only `hashing-<dim>` models. Never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashingLoader;

impl ModelLoader for HashingLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn EmbeddingModel>, EmbeddingError> {
        HashingEmbedder::from_model_id(model_id)
            .map(|m| Arc::new(m) as Arc<dyn EmbeddingModel>)
            .ok_or_else(|| EmbeddingError::ModelNotFound(model_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_loader_serves_hashing_ids_without_download() {
        let temp = tempfile::TempDir::new().unwrap();
        let loader = CandleLoader::new(ModelFiles::new(temp.path()));
        let model = loader.load("hashing-64").unwrap();
        assert_eq!(model.info().dimension, 64);
    }

    #[test]
    fn test_hashing_loader_rejects_other_ids() {
        assert!(HashingLoader.load("hashing-16").is_ok());
        assert!(matches!(
            HashingLoader.load("sentence-transformers/all-MiniLM-L6-v2"),
            Err(EmbeddingError::ModelNotFound(_))
        ));
    }
}
