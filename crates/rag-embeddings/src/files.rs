//! Model file storage.
//!
//! Downloads model files from HuggingFace Hub into a local directory, one
//! sub-directory per repository.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::EmbeddingError;

/// Default model repository on HuggingFace
pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Required model files
pub const MODEL_FILES: &[&str] = &["config.json", "tokenizer.json", "model.safetensors"];

/// Location of model files on disk.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Root directory holding one folder per repository
    pub root: PathBuf,
}

impl Default for ModelFiles {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("rag-service")
            .join("models");

        Self { root }
    }
}

impl ModelFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory for one repository
    pub fn model_dir(&self, repo_id: &str) -> PathBuf {
        self.root.join(repo_id.replace(['/', '\\'], "_"))
    }

    /// Check if all model files for a repository are present
    pub fn is_cached(&self, repo_id: &str) -> bool {
        let model_dir = self.model_dir(repo_id);
        MODEL_FILES.iter().all(|f| model_dir.join(f).exists())
    }
}

/// Paths to model files
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

/// Get or download model files for a repository.
///
/// Returns paths to config.json, tokenizer.json, and model.safetensors.
pub fn get_or_download_model(
    files: &ModelFiles,
    repo_id: &str,
) -> Result<ModelPaths, EmbeddingError> {
    if repo_id.trim().is_empty() {
        return Err(EmbeddingError::InvalidInput("empty model id".to_string()));
    }

    let model_dir = files.model_dir(repo_id);

    if files.is_cached(repo_id) {
        debug!(path = ?model_dir, "Using cached model files");
    } else {
        info!(repo = %repo_id, "Downloading model files...");
        download_model_files(files, repo_id)?;
    }

    Ok(ModelPaths {
        config: model_dir.join("config.json"),
        tokenizer: model_dir.join("tokenizer.json"),
        weights: model_dir.join("model.safetensors"),
    })
}

/// Download model files from HuggingFace Hub
fn download_model_files(files: &ModelFiles, repo_id: &str) -> Result<(), EmbeddingError> {
    use hf_hub::api::sync::Api;

    let api = Api::new().map_err(|e| EmbeddingError::Download(e.to_string()))?;
    let repo = api.model(repo_id.to_string());

    let model_dir = files.model_dir(repo_id);
    std::fs::create_dir_all(&model_dir)?;

    for filename in MODEL_FILES {
        debug!(file = filename, "Downloading...");
        let source_path = repo
            .get(filename)
            .map_err(|e| EmbeddingError::Download(format!("{}: {}", filename, e)))?;

        let dest_path = model_dir.join(filename);
        std::fs::copy(&source_path, &dest_path)?;
        debug!(file = filename, "Downloaded to {:?}", dest_path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_files_default() {
        let files = ModelFiles::default();
        assert!(files.root.to_string_lossy().contains("rag-service"));
    }

    #[test]
    fn test_model_dir_flattens_repo_id() {
        let files = ModelFiles::new("/models");
        assert_eq!(
            files.model_dir(DEFAULT_MODEL_REPO),
            PathBuf::from("/models/sentence-transformers_all-MiniLM-L6-v2")
        );
    }

    #[test]
    fn test_is_cached_empty() {
        let temp = TempDir::new().unwrap();
        let files = ModelFiles::new(temp.path());
        assert!(!files.is_cached("test/model"));
    }

    #[test]
    fn test_is_cached_when_all_files_present() {
        let temp = TempDir::new().unwrap();
        let files = ModelFiles::new(temp.path());
        let dir = files.model_dir("test/model");
        std::fs::create_dir_all(&dir).unwrap();
        for f in MODEL_FILES {
            std::fs::write(dir.join(f), b"{}").unwrap();
        }
        assert!(files.is_cached("test/model"));
    }

    #[test]
    fn test_empty_repo_rejected() {
        let temp = TempDir::new().unwrap();
        let files = ModelFiles::new(temp.path());
        assert!(matches!(
            get_or_download_model(&files, "  "),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
