//! End-to-end test infrastructure for the RAG query service.
//!
//! Provides a shared TestHarness that wires the real components together
//! over an in-memory index, a feature-hashing embedding model and a manual
//! clock, so tests run offline and deterministically.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request};
use secrecy::SecretString;

use rag_admission::{AuthConfig, RateLimitConfig, RateLimiter, SessionAuthenticator};
use rag_embeddings::{EmbeddingModel, HashingEmbedder, HashingLoader, ModelCache, ModelCacheConfig};
use rag_retrieval::{BlockingSearch, PassageSearch, PipelineConfig, RetrievalPipeline};
use rag_service::{AskRequest, QueryService, QueryServiceConfig};
use rag_types::{ManualClock, Passage, SharedClock, SourceRef};
use rag_vector::{Distance, FlatIndex};

/// Embedding model every harness index is built with
pub const MODEL: &str = "hashing-64";
pub const DIMENSION: usize = 64;
pub const ADMIN_KEY: &str = "e2e-admin-key";
pub const JWT_SECRET: &str = "e2e-jwt-secret";
/// Harness clock start, 2024-01-29 approx
pub const START_MS: i64 = 1_706_540_400_000;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    /// The corpus, also reachable through `service`
    pub index: Arc<FlatIndex>,
    /// Shares slots with the pipeline's cache
    pub models: ModelCache,
    pub service: Arc<QueryService>,
}

impl TestHarness {
    /// Harness over an empty corpus with default limits.
    pub fn new() -> Self {
        HarnessBuilder::default().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Axum router over this harness's service.
    pub fn router(&self) -> axum::Router {
        rag_service::router(Arc::clone(&self.service))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Configures a [`TestHarness`].
pub struct HarnessBuilder {
    model: String,
    passages: Vec<Passage>,
    search: Option<Arc<dyn PassageSearch>>,
    requests_per_minute: u32,
    request_timeout: Duration,
    session_expiry: Duration,
    result_cache_ttl: Duration,
    model_capacity: usize,
    model_ttl: Duration,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            model: MODEL.to_string(),
            passages: Vec::new(),
            search: None,
            requests_per_minute: 60,
            request_timeout: Duration::from_secs(30),
            session_expiry: Duration::from_secs(3600),
            result_cache_ttl: Duration::ZERO,
            model_capacity: 4,
            model_ttl: Duration::from_secs(3600),
        }
    }
}

impl HarnessBuilder {
    /// Model the corpus index is tagged with and queries default to.
    pub fn model(mut self, model_id: &str) -> Self {
        self.model = model_id.to_string();
        self
    }

    pub fn passages(mut self, passages: Vec<Passage>) -> Self {
        self.passages = passages;
        self
    }

    /// Replace the index-backed search (slow or failing doubles).
    pub fn search(mut self, search: Arc<dyn PassageSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn requests_per_minute(mut self, n: u32) -> Self {
        self.requests_per_minute = n;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn session_expiry(mut self, expiry: Duration) -> Self {
        self.session_expiry = expiry;
        self
    }

    /// Result cache lifetime; disabled by default so every query searches.
    pub fn result_cache_ttl(mut self, ttl: Duration) -> Self {
        self.result_cache_ttl = ttl;
        self
    }

    pub fn model_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.model_capacity = capacity;
        self.model_ttl = ttl;
        self
    }

    pub fn build(self) -> TestHarness {
        let clock = Arc::new(ManualClock::new(START_MS));
        let shared: SharedClock = clock.clone();

        let index = Arc::new(FlatIndex::new(&self.model, DIMENSION, Distance::Cosine));
        index
            .extend_embedded(&HashingEmbedder::new(DIMENSION), self.passages)
            .expect("Failed to index passages");

        let search = self
            .search
            .unwrap_or_else(|| Arc::new(BlockingSearch::new(index.clone())) as Arc<dyn PassageSearch>);

        let models = ModelCache::new(
            Arc::new(HashingLoader),
            ModelCacheConfig {
                capacity: self.model_capacity,
                ttl: self.model_ttl,
            },
            shared.clone(),
        );

        let pipeline = RetrievalPipeline::new(
            models.clone(),
            search,
            PipelineConfig {
                default_model: self.model.clone(),
                result_cache_ttl: self.result_cache_ttl,
                embed_workers: 2,
                ..Default::default()
            },
            shared.clone(),
        );

        let auth = SessionAuthenticator::new(
            AuthConfig {
                api_keys: vec![SecretString::from(ADMIN_KEY.to_string())],
                jwt_secret: Some(SecretString::from(JWT_SECRET.to_string())),
                session_expiry: self.session_expiry,
            },
            shared.clone(),
        );
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(self.requests_per_minute), shared);

        let service = Arc::new(QueryService::new(
            Arc::new(auth),
            Arc::new(limiter),
            Arc::new(pipeline),
            QueryServiceConfig {
                request_timeout: self.request_timeout,
                default_top_k: 5,
            },
        ));

        TestHarness {
            clock,
            index,
            models,
            service,
        }
    }
}

/// Passage with a source reference derived from its id.
pub fn passage(doc_id: &str, text: &str) -> Passage {
    Passage::new(doc_id, text, SourceRef::new(format!("{doc_id}.pdf"), 0))
}

/// `Authorization` value for the admin key.
pub fn admin_auth() -> String {
    format!("ApiKey {ADMIN_KEY}")
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn ask_request(query: &str, k: usize) -> AskRequest {
    AskRequest {
        query_text: query.to_string(),
        k: Some(k),
        model: None,
    }
}

/// Embed `text` with the harness model.
pub fn embed(text: &str) -> Vec<f32> {
    HashingEmbedder::new(DIMENSION)
        .embed(text)
        .expect("Failed to embed")
        .values
}

/// Build an HTTP request with an optional `Authorization` header and JSON body.
pub fn http_request(
    method: Method,
    uri: &str,
    authorization: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("Failed to build request")
}

/// Read a response body as JSON.
pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
