//! Integration tests for the daemon wiring.
//!
//! These tests build a persistent vector store on disk, serve it over a real
//! socket and query it the way `rag-daemon ask` does.

use std::sync::Arc;

use tempfile::TempDir;

use rag_daemon::build_service;
use rag_embeddings::{EmbeddingModel, HashingEmbedder, HashingLoader};
use rag_service::{serve, AskRequest, AskResponse, ErrorBody, HealthResponse, SessionResponse};
use rag_types::{ManualClock, Passage, Settings, SourceRef};
use rag_vector::{Distance, IndexManifest, MetaIndex, PersistentIndex};

const MODEL: &str = "hashing-64";
const KEY: &str = "integration-key";

/// Test harness that manages server lifecycle.
struct TestHarness {
    _temp_dir: TempDir,
    endpoint: String,
    client: reqwest::Client,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    server_handle: tokio::task::JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>,
}

impl TestHarness {
    async fn new(passages: &[(&str, &str, &str, u64)]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("chromadb");
        let meta_path = temp_dir.path().join("meta_index.json");

        // Ingestion side: write rows, vectors and the meta index.
        let model = HashingEmbedder::new(64);
        {
            let index = PersistentIndex::create(
                &db_path,
                IndexManifest {
                    model_id: MODEL.to_string(),
                    dimension: 64,
                    metric: Distance::Cosine,
                },
            )
            .expect("Failed to create index");

            let mut meta = MetaIndex::default();
            for (doc_id, text, file, offset) in passages {
                let embedding = model.embed(text).expect("embed").values;
                index
                    .append(&Passage::new(*doc_id, *text, SourceRef::default()).with_embedding(embedding))
                    .expect("append");
                meta.insert(*doc_id, SourceRef::new(*file, *offset));
            }
            index.save().expect("save");
            meta.save(&meta_path).expect("save meta");
        }

        let index = PersistentIndex::open(&db_path, Some(&meta_path)).expect("Failed to open index");

        let mut settings: Settings = serde_json::from_str("{}").expect("default settings");
        settings.embedding_model = MODEL.to_string();
        settings.api_key = Some(KEY.to_string());
        settings.jwt_secret = Some("integration-secret".to_string());

        let service = build_service(
            &settings,
            Arc::new(index),
            Arc::new(HashingLoader),
            Arc::new(ManualClock::new(chrono::Utc::now().timestamp_millis())),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let endpoint = format!("http://{}", listener.local_addr().expect("addr"));
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let server_handle = tokio::spawn(serve(listener, service, async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            _temp_dir: temp_dir,
            endpoint,
            client: reqwest::Client::new(),
            shutdown_tx: Some(shutdown_tx),
            server_handle,
        }
    }

    async fn ask(&self, authorization: &str, query: &str, k: usize) -> reqwest::Response {
        self.client
            .post(format!("{}/api/ask", self.endpoint))
            .header("authorization", authorization)
            .json(&AskRequest {
                query_text: query.to_string(),
                k: Some(k),
                model: None,
            })
            .send()
            .await
            .expect("request")
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.server_handle
            .await
            .expect("join")
            .expect("server exited cleanly");
    }
}

#[tokio::test]
async fn test_query_over_persistent_store() {
    let harness = TestHarness::new(&[
        ("refund", "Refunds are issued within 30 days of purchase.", "policy.pdf", 0),
        ("shipping", "Orders ship within two business days.", "shipping.pdf", 512),
    ])
    .await;

    let response = harness
        .ask(&format!("ApiKey {KEY}"), "Refunds are issued within 30 days of purchase.", 1)
        .await;
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));

    let answer: AskResponse = response.json().await.expect("json");
    assert_eq!(answer.model, MODEL);
    assert_eq!(answer.passages.len(), 1);
    assert_eq!(answer.passages[0].doc_id, "refund");
    assert_eq!(answer.passages[0].source, SourceRef::new("policy.pdf", 0));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_health_is_open() {
    let harness = TestHarness::new(&[("a", "alpha", "a.txt", 0)]).await;

    let health: HealthResponse = harness
        .client
        .get(format!("{}/health", harness.endpoint))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(health.status, "ok");
    assert_eq!(health.passages, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_session_token_round_trip() {
    let harness = TestHarness::new(&[("a", "alpha beta", "a.txt", 0)]).await;

    let session: SessionResponse = harness
        .client
        .post(format!("{}/api/sessions", harness.endpoint))
        .header("authorization", format!("ApiKey {KEY}"))
        .json(&serde_json::json!({ "subject": "alice" }))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");

    let response = harness
        .ask(&format!("Bearer {}", session.token), "alpha", 1)
        .await;
    assert_eq!(response.status(), 200);

    let revoked = harness
        .client
        .delete(format!("{}/api/sessions/{}", harness.endpoint, session.session_id))
        .header("authorization", format!("ApiKey {KEY}"))
        .send()
        .await
        .expect("request");
    assert_eq!(revoked.status(), 200);

    let response = harness
        .ask(&format!("Bearer {}", session.token), "alpha", 1)
        .await;
    assert_eq!(response.status(), 401);
    let body: ErrorBody = response.json().await.expect("json");
    assert_eq!(body.error, "unauthenticated");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_wrong_key_rejected() {
    let harness = TestHarness::new(&[("a", "alpha", "a.txt", 0)]).await;

    let response = harness.ask("ApiKey not-the-key", "alpha", 1).await;
    assert_eq!(response.status(), 401);

    harness.shutdown().await;
}
