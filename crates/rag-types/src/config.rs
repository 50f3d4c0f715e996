//! Configuration loading for the RAG query service.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! Environment variables use the plain deployment names (`MODEL_CACHE_SIZE`,
//! `REQUEST_TIMEOUT`, `JWT_SECRET`, ...), matched case-insensitively.
//! The default config file lives at `<config_dir>/rag-service/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

const APP_NAME: &str = "rag-service";

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum number of resident embedding-model handles
    #[serde(default = "default_model_cache_size")]
    pub model_cache_size: usize,

    /// Idle time (seconds) after which an unreferenced model is evicted
    #[serde(default = "default_model_cache_ttl")]
    pub model_cache_ttl: u64,

    /// Upper bound (seconds) on a single query request
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Token-bucket capacity per identity, refilled over 60 seconds
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,

    /// Session token lifetime (seconds)
    #[serde(default = "default_session_expiry")]
    pub session_expiry: u64,

    /// HMAC secret for session tokens. Session tokens are rejected when unset.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Admin API key(s), comma separated
    #[serde(default)]
    pub api_key: Option<String>,

    /// Root data directory owned by the ingestion collaborator
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Vector store directory (defaults under `data_dir`)
    #[serde(default)]
    pub chroma_db_path: Option<String>,

    /// Metadata index file (defaults under `data_dir`)
    #[serde(default)]
    pub meta_index_path: Option<String>,

    /// Embedding model used when a query does not name one
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Directory for downloaded model files (defaults under `data_dir`)
    #[serde(default)]
    pub model_dir: Option<String>,

    /// Passages returned when a query does not specify `k`
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Largest `k` a caller may request
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Fuzzy-ratio threshold above which two passages are duplicates
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,

    /// Candidates fetched per requested passage before dedup
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Candidates farther than this distance are dropped (unset = keep all)
    #[serde(default)]
    pub max_distance: Option<f32>,

    /// Lifetime (seconds) of cached retrieval results; 0 disables the cache
    #[serde(default = "default_result_cache_ttl")]
    pub result_cache_ttl: u64,

    /// Maximum cached retrieval results
    #[serde(default = "default_result_cache_size")]
    pub result_cache_size: usize,

    /// Idle time (seconds) after which a rate bucket is forgotten
    #[serde(default = "default_bucket_idle_ttl")]
    pub bucket_idle_ttl: u64,

    /// HTTP bind host
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// HTTP bind port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_model_cache_size() -> usize {
    4
}

fn default_model_cache_ttl() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_requests_per_minute() -> u32 {
    60
}

fn default_session_expiry() -> u64 {
    86_400
}

fn default_data_dir() -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_max_top_k() -> usize {
    50
}

fn default_dedup_threshold() -> f64 {
    0.9
}

fn default_overfetch_factor() -> usize {
    2
}

fn default_result_cache_ttl() -> u64 {
    300
}

fn default_result_cache_size() -> usize {
    256
}

fn default_bucket_idle_ttl() -> u64 {
    600
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_cache_size: default_model_cache_size(),
            model_cache_ttl: default_model_cache_ttl(),
            request_timeout: default_request_timeout(),
            max_requests_per_minute: default_max_requests_per_minute(),
            session_expiry: default_session_expiry(),
            jwt_secret: None,
            api_key: None,
            data_dir: default_data_dir(),
            chroma_db_path: None,
            meta_index_path: None,
            embedding_model: default_embedding_model(),
            model_dir: None,
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            dedup_threshold: default_dedup_threshold(),
            overfetch_factor: default_overfetch_factor(),
            max_distance: None,
            result_cache_ttl: default_result_cache_ttl(),
            result_cache_size: default_result_cache_size(),
            bucket_idle_ttl: default_bucket_idle_ttl(),
            api_host: default_api_host(),
            api_port: default_api_port(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (<config_dir>/rag-service/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (MODEL_CACHE_SIZE, JWT_SECRET, ...)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Bare names, no prefix
        // Unrelated variables (PATH, HOME, ...) fall through serde as unknown keys.
        builder = builder.add_source(Environment::default().try_parsing(true));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the service misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_cache_size == 0 {
            return Err(ConfigError::invalid("model_cache_size", "must be > 0"));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::invalid("request_timeout", "must be > 0"));
        }
        if self.max_requests_per_minute == 0 {
            return Err(ConfigError::invalid("max_requests_per_minute", "must be > 0"));
        }
        if self.session_expiry == 0 {
            return Err(ConfigError::invalid("session_expiry", "must be > 0"));
        }
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "dedup_threshold",
                format!("must be in (0.0, 1.0], got {}", self.dedup_threshold),
            ));
        }
        if self.overfetch_factor == 0 {
            return Err(ConfigError::invalid("overfetch_factor", "must be >= 1"));
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(ConfigError::invalid(
                "default_top_k",
                format!("must be in 1..={}, got {}", self.max_top_k, self.default_top_k),
            ));
        }
        Ok(())
    }

    /// Socket address string for the HTTP server
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn model_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.model_cache_ttl)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session_expiry)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl)
    }

    pub fn bucket_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_ttl)
    }

    /// Configured admin keys, trimmed, empty entries dropped.
    pub fn api_keys(&self) -> Vec<String> {
        self.api_key
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Data directory with a leading `~/` expanded
    pub fn expanded_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn chroma_db_path(&self) -> PathBuf {
        match &self.chroma_db_path {
            Some(path) => expand_home(path),
            None => self.expanded_data_dir().join("vector_db").join("chromadb"),
        }
    }

    pub fn meta_index_path(&self) -> PathBuf {
        match &self.meta_index_path {
            Some(path) => expand_home(path),
            None => self
                .expanded_data_dir()
                .join("vector_db")
                .join("meta_index.json"),
        }
    }

    pub fn model_dir(&self) -> PathBuf {
        match &self.model_dir {
            Some(path) => expand_home(path),
            None => self.expanded_data_dir().join("models"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
