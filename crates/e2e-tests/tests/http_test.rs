//! HTTP surface E2E tests.
//!
//! Every error kind must reach the client with its status code, a JSON body
//! naming the kind, and no partial results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;

use e2e_tests::{admin_auth, bearer, http_request, json_body, passage, TestHarness, MODEL};
use rag_embeddings::Embedding;
use rag_retrieval::PassageSearch;
use rag_vector::{RetrievalCandidate, VectorError};

fn harness() -> TestHarness {
    TestHarness::builder()
        .passages(vec![
            passage("refund", "Refunds are issued within 30 days of purchase."),
            passage("shipping", "Shipping is free on orders over fifty dollars."),
        ])
        .requests_per_minute(3)
        .build()
}

#[tokio::test]
async fn test_ask_ok() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(http_request(
            Method::POST,
            "/api/ask",
            Some(&admin_auth()),
            Some(json!({ "query_text": "refund policy", "k": 2 })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    assert_eq!(body["model"], MODEL);
    let passages = body["passages"].as_array().unwrap();
    assert_eq!(passages.len(), 2);
    for p in passages {
        assert!(p["doc_id"].is_string());
        assert!(p["source"]["file"].is_string());
        assert!(p["distance"].is_number());
    }
}

#[tokio::test]
async fn test_request_id_echoed() {
    let harness = harness();
    let mut request = http_request(Method::GET, "/health", None, None);
    request
        .headers_mut()
        .insert("x-request-id", "trace-123".parse().unwrap());

    let response = harness.router().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-123");
}

#[tokio::test]
async fn test_missing_credential_401() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(http_request(
            Method::POST,
            "/api/ask",
            None,
            Some(json!({ "query_text": "refund" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(
        body,
        json!({ "error": "unauthenticated", "message": "Unauthenticated", "retryable": false })
    );
}

#[tokio::test]
async fn test_rate_limited_429_with_retry_after() {
    let harness = harness();
    let router = harness.router();

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(http_request(
                Method::POST,
                "/api/ask",
                Some(&admin_auth()),
                Some(json!({ "query_text": "refund", "k": 1 })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    harness.clock.advance(Duration::from_millis(20_500));
    let response = router
        .oneshot(http_request(
            Method::POST,
            "/api/ask",
            Some(&admin_auth()),
            Some(json!({ "query_text": "refund", "k": 1 })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "40");
    let body = json_body(response).await;
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_invalid_requests_400() {
    let harness = harness();
    let cases = [
        json!({ "query_text": "refund", "k": 0 }),
        json!({ "query_text": "refund", "k": 500 }),
        json!({ "query_text": "" }),
        json!({ "k": 3 }),
    ];

    for case in cases {
        harness.clock.advance(Duration::from_secs(60));
        let response = harness
            .router()
            .oneshot(http_request(
                Method::POST,
                "/api/ask",
                Some(&admin_auth()),
                Some(case.clone()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "case {case}");
        let body = json_body(response).await;
        assert_eq!(body["error"], "invalid_request", "case {case}");
    }
}

#[tokio::test]
async fn test_malformed_json_400() {
    let harness = harness();
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/ask")
        .header(header::AUTHORIZATION, admin_auth())
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();

    let response = harness.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

struct SlowSearch;

#[async_trait]
impl PassageSearch for SlowSearch {
    async fn search(
        &self,
        _query: Embedding,
        _k: usize,
    ) -> Result<Vec<RetrievalCandidate>, VectorError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    fn model_id(&self) -> &str {
        MODEL
    }

    fn len(&self) -> usize {
        0
    }
}

struct BrokenSearch;

#[async_trait]
impl PassageSearch for BrokenSearch {
    async fn search(
        &self,
        _query: Embedding,
        _k: usize,
    ) -> Result<Vec<RetrievalCandidate>, VectorError> {
        Err(VectorError::Index("graph file truncated".to_string()))
    }

    fn model_id(&self) -> &str {
        MODEL
    }

    fn len(&self) -> usize {
        0
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_504() {
    let harness = TestHarness::builder()
        .search(Arc::new(SlowSearch))
        .request_timeout(Duration::from_secs(2))
        .build();

    let response = harness
        .router()
        .oneshot(http_request(
            Method::POST,
            "/api/ask",
            Some(&admin_auth()),
            Some(json!({ "query_text": "refund" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = json_body(response).await;
    assert_eq!(body["error"], "timeout");
    assert_eq!(body["retryable"], true);
    assert!(body.get("passages").is_none());
}

#[tokio::test]
async fn test_index_failure_502() {
    let harness = TestHarness::builder().search(Arc::new(BrokenSearch)).build();

    let response = harness
        .router()
        .oneshot(http_request(
            Method::POST,
            "/api/ask",
            Some(&admin_auth()),
            Some(json!({ "query_text": "refund" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"], "index_unavailable");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_session_endpoints() {
    let harness = harness();
    let router = harness.router();

    let response = router
        .clone()
        .oneshot(http_request(
            Method::POST,
            "/api/sessions",
            Some(&admin_auth()),
            Some(json!({ "subject": "alice" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = json_body(response).await;
    let token = session["token"].as_str().unwrap().to_string();
    let session_id = session["session_id"].as_str().unwrap().to_string();

    // A session cannot revoke sessions
    let response = router
        .clone()
        .oneshot(http_request(
            Method::DELETE,
            &format!("/api/sessions/{session_id}"),
            Some(&bearer(&token)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(http_request(
            Method::DELETE,
            &format!("/api/sessions/{session_id}"),
            Some(&admin_auth()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["revoked"], true);
}

#[tokio::test]
async fn test_session_credential_checked_before_body() {
    let harness = harness();
    let malformed = |auth: Option<String>| {
        let mut builder = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/sessions")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(axum::body::Body::from("{not json")).unwrap()
    };

    let response = harness.router().oneshot(malformed(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthenticated");

    let response = harness
        .router()
        .oneshot(malformed(Some(bearer("aaa.bbb.ccc"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness
        .router()
        .oneshot(malformed(Some(admin_auth())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_unauthenticated() {
    let harness = harness();
    let response = harness
        .router()
        .oneshot(http_request(Method::GET, "/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body, json!({ "status": "ok", "passages": 2, "models_resident": 0 }));
    assert!(harness.service.limiter().is_empty());
}
