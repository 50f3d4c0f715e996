//! Request admission and serving.
//!
//! Each query walks `Unauthenticated → Identified → Admitted → Served`, or
//! stops at `Rejected` at the first gate that fails. Gates run strictly in
//! order and a failed gate skips everything after it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rag_admission::{Decision, RateLimiter, SessionAuthenticator};
use rag_retrieval::RetrievalPipeline;
use rag_types::Identity;
use serde::Serialize;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::types::{
    AskRequest, AskResponse, HealthResponse, PassageView, RevokeResponse, SessionResponse,
};

/// Where a request is in the admission sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Unauthenticated,
    /// Credential resolved to an identity
    Identified,
    /// Rate limiter passed
    Admitted,
    Served,
    Rejected,
}

/// Serving counters.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    pub requests: AtomicU64,
    pub served: AtomicU64,
    pub cache_hits: AtomicU64,
    pub rejected_unauthenticated: AtomicU64,
    pub rejected_rate_limited: AtomicU64,
    pub rejected_invalid: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ServiceMetricsSnapshot {
        ServiceMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            rejected_unauthenticated: self.rejected_unauthenticated.load(Ordering::Relaxed),
            rejected_rate_limited: self.rejected_rate_limited.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    fn record(&self, err: &ServiceError) {
        let counter = match err {
            ServiceError::Unauthenticated => &self.rejected_unauthenticated,
            ServiceError::RateLimited { .. } => &self.rejected_rate_limited,
            ServiceError::InvalidRequest(_) => &self.rejected_invalid,
            ServiceError::Timeout(_) => &self.timed_out,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of serving counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceMetricsSnapshot {
    pub requests: u64,
    pub served: u64,
    pub cache_hits: u64,
    pub rejected_unauthenticated: u64,
    pub rejected_rate_limited: u64,
    pub rejected_invalid: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl ServiceMetricsSnapshot {
    /// Requests stopped at a gate or by a failure.
    pub fn total_rejected(&self) -> u64 {
        self.rejected_unauthenticated
            + self.rejected_rate_limited
            + self.rejected_invalid
            + self.failed
            + self.timed_out
    }
}

/// Serving knobs.
#[derive(Debug, Clone)]
pub struct QueryServiceConfig {
    /// Upper bound on one retrieval
    pub request_timeout: Duration,
    /// `k` when the request omits it
    pub default_top_k: usize,
}

impl Default for QueryServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            default_top_k: 5,
        }
    }
}

/// The query-serving core behind the HTTP surface.
pub struct QueryService {
    auth: Arc<SessionAuthenticator>,
    limiter: Arc<RateLimiter>,
    pipeline: Arc<RetrievalPipeline>,
    config: QueryServiceConfig,
    metrics: ServiceMetrics,
}

impl QueryService {
    pub fn new(
        auth: Arc<SessionAuthenticator>,
        limiter: Arc<RateLimiter>,
        pipeline: Arc<RetrievalPipeline>,
        config: QueryServiceConfig,
    ) -> Self {
        Self {
            auth,
            limiter,
            pipeline,
            config,
            metrics: ServiceMetrics::new(),
        }
    }

    pub fn auth(&self) -> &Arc<SessionAuthenticator> {
        &self.auth
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn pipeline(&self) -> &Arc<RetrievalPipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &QueryServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> ServiceMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run the authentication and rate-limit gates.
    pub fn admit(&self, authorization: Option<&str>) -> Result<Identity, ServiceError> {
        self.metrics.requests.fetch_add(1, Ordering::Relaxed);
        let mut stage = RequestStage::Unauthenticated;
        let result = self.run_gates(authorization, &mut stage);
        if let Err(err) = &result {
            self.metrics.record(err);
            let failed_at = std::mem::replace(&mut stage, RequestStage::Rejected);
            debug!(?failed_at, kind = err.kind(), "Request rejected");
        }
        result
    }

    fn run_gates(
        &self,
        authorization: Option<&str>,
        stage: &mut RequestStage,
    ) -> Result<Identity, ServiceError> {
        let identity = self.auth.resolve_header(authorization)?;
        *stage = RequestStage::Identified;

        match self.limiter.check(&identity.rate_key()) {
            Decision::Admitted { remaining } => {
                *stage = RequestStage::Admitted;
                debug!(principal = %identity.principal, remaining, "Admitted");
                Ok(identity)
            }
            Decision::Limited { retry_after } => {
                warn!(principal = %identity.principal, ?retry_after, "Rate limited");
                Err(ServiceError::RateLimited { retry_after })
            }
        }
    }

    /// Serve a query end to end: gates, then bounded retrieval.
    pub async fn ask(
        &self,
        authorization: Option<&str>,
        request: AskRequest,
    ) -> Result<AskResponse, ServiceError> {
        let identity = self.admit(authorization)?;
        self.serve(&identity, request).await
    }

    /// Retrieval for an already admitted identity.
    ///
    /// The whole retrieval is bounded by the request timeout. On expiry the
    /// retrieval future is dropped, which returns any model checkout it held.
    pub async fn serve(
        &self,
        identity: &Identity,
        request: AskRequest,
    ) -> Result<AskResponse, ServiceError> {
        let started = Instant::now();
        let k = request.k.unwrap_or(self.config.default_top_k);

        let outcome = timeout(
            self.config.request_timeout,
            self.pipeline
                .retrieve(&request.query_text, k, request.model.as_deref()),
        )
        .await;

        let result = match outcome {
            Ok(Ok(retrieval)) => Ok(retrieval),
            Ok(Err(err)) => Err(ServiceError::from(err)),
            Err(_) => Err(ServiceError::Timeout(self.config.request_timeout)),
        };

        let retrieval = match result {
            Ok(retrieval) => retrieval,
            Err(err) => {
                self.metrics.record(&err);
                warn!(principal = %identity.principal, kind = err.kind(), error = %err, "Query failed");
                return Err(err);
            }
        };

        self.metrics.served.fetch_add(1, Ordering::Relaxed);
        if retrieval.cached {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            stage = ?RequestStage::Served,
            principal = %identity.principal,
            k,
            returned = retrieval.passages.len(),
            cached = retrieval.cached,
            elapsed_ms,
            "Query served"
        );

        Ok(AskResponse {
            passages: retrieval.passages.iter().map(PassageView::from).collect(),
            model: retrieval.model_id,
            elapsed_ms,
        })
    }

    /// Mint a session token. Only API-key holders may do this.
    pub fn issue_session(
        &self,
        authorization: Option<&str>,
        subject: &str,
    ) -> Result<SessionResponse, ServiceError> {
        let identity = self.admit_operator(authorization)?;
        self.mint_session(&identity, subject)
    }

    /// Mint a session token for an already admitted operator.
    pub fn mint_session(
        &self,
        identity: &Identity,
        subject: &str,
    ) -> Result<SessionResponse, ServiceError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(ServiceError::InvalidRequest("subject is empty".to_string()));
        }

        let issued = self.auth.issue_session(subject)?;
        info!(
            issuer = %identity.principal,
            session_id = %issued.session_id,
            expires_at_ms = issued.expires_at_ms,
            "Session issued"
        );
        Ok(SessionResponse {
            token: issued.token,
            expires_at_ms: issued.expires_at_ms,
            session_id: issued.session_id,
        })
    }

    /// Revoke a session. Only API-key holders may do this.
    pub fn revoke_session(
        &self,
        authorization: Option<&str>,
        session_id: &str,
    ) -> Result<RevokeResponse, ServiceError> {
        let identity = self.admit_operator(authorization)?;
        if session_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("session id is empty".to_string()));
        }
        if !self.auth.sessions_enabled() {
            return Err(ServiceError::InvalidRequest(
                "session tokens are disabled".to_string(),
            ));
        }

        let revoked = self.auth.revoke(session_id);
        info!(issuer = %identity.principal, session_id, revoked, "Session revoked");
        Ok(RevokeResponse {
            session_id: session_id.to_string(),
            revoked,
        })
    }

    /// Gates for operator routes: an API key, then the rate limit.
    pub fn admit_operator(&self, authorization: Option<&str>) -> Result<Identity, ServiceError> {
        let identity = self.admit(authorization)?;
        if !identity.is_api_key() {
            self.metrics.record(&ServiceError::Unauthenticated);
            return Err(ServiceError::Unauthenticated);
        }
        Ok(identity)
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            passages: self.pipeline.passage_count(),
            models_resident: self.pipeline.models().stats().resident,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_admission::{AuthConfig, RateLimitConfig};
    use rag_embeddings::{HashingLoader, ModelCache, ModelCacheConfig};
    use rag_retrieval::{BlockingSearch, PipelineConfig};
    use rag_types::{ManualClock, Passage, SharedClock, SourceRef};
    use rag_vector::{Distance, FlatIndex};
    use secrecy::SecretString;

    const KEY: &str = "test-admin-key";
    const MODEL: &str = "hashing-64";

    fn service(capacity: u32) -> (QueryService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let shared: SharedClock = clock.clone();

        let model = rag_embeddings::HashingEmbedder::new(64);
        let index = FlatIndex::new(MODEL, 64, Distance::Cosine);
        index
            .extend_embedded(
                &model,
                [
                    Passage::new("a", "Refunds are issued within 30 days.", SourceRef::new("a.pdf", 0)),
                    Passage::new("b", "Shipping takes five business days.", SourceRef::new("b.pdf", 0)),
                ],
            )
            .unwrap();

        let models = ModelCache::new(
            Arc::new(HashingLoader),
            ModelCacheConfig::default(),
            shared.clone(),
        );
        let pipeline = RetrievalPipeline::new(
            models,
            Arc::new(BlockingSearch::new(Arc::new(index))),
            PipelineConfig {
                default_model: MODEL.to_string(),
                ..Default::default()
            },
            shared.clone(),
        );
        let auth = SessionAuthenticator::new(
            AuthConfig {
                api_keys: vec![SecretString::from(KEY.to_string())],
                jwt_secret: Some(SecretString::from("secret".to_string())),
                ..Default::default()
            },
            shared.clone(),
        );
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(capacity), shared);

        (
            QueryService::new(
                Arc::new(auth),
                Arc::new(limiter),
                Arc::new(pipeline),
                QueryServiceConfig::default(),
            ),
            clock,
        )
    }

    fn ask(query: &str) -> AskRequest {
        AskRequest {
            query_text: query.to_string(),
            k: Some(1),
            model: None,
        }
    }

    #[tokio::test]
    async fn test_ask_with_api_key() {
        let (service, _clock) = service(10);
        let header = format!("ApiKey {KEY}");
        let response = service
            .ask(Some(&header), ask("how do refunds work"))
            .await
            .unwrap();
        assert_eq!(response.model, MODEL);
        assert_eq!(response.passages.len(), 1);
        assert_eq!(service.metrics().served, 1);
    }

    #[tokio::test]
    async fn test_missing_credential_rejected_before_limiter() {
        let (service, _clock) = service(10);
        let err = service.ask(None, ask("refunds")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthenticated));
        assert!(service.limiter().is_empty());
        assert_eq!(service.metrics().rejected_unauthenticated, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_after_capacity() {
        let (service, clock) = service(2);
        let header = format!("ApiKey {KEY}");
        service.ask(Some(&header), ask("refunds")).await.unwrap();
        service.ask(Some(&header), ask("shipping")).await.unwrap();

        let err = service.ask(Some(&header), ask("refunds")).await.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { .. }));

        clock.advance(Duration::from_secs(60));
        assert!(service.ask(Some(&header), ask("refunds")).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_k_after_admission() {
        let (service, _clock) = service(10);
        let header = format!("ApiKey {KEY}");
        let mut request = ask("refunds");
        request.k = Some(0);
        let err = service.ask(Some(&header), request).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
        assert_eq!(service.metrics().rejected_invalid, 1);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (service, _clock) = service(10);
        let operator = format!("ApiKey {KEY}");
        let session = service.issue_session(Some(&operator), "alice").unwrap();

        let bearer = format!("Bearer {}", session.token);
        assert!(service.ask(Some(&bearer), ask("refunds")).await.is_ok());

        // Sessions cannot mint sessions
        let err = service.issue_session(Some(&bearer), "mallory").unwrap_err();
        assert!(matches!(err, ServiceError::Unauthenticated));

        let revoked = service
            .revoke_session(Some(&operator), &session.session_id)
            .unwrap();
        assert!(revoked.revoked);

        let err = service.ask(Some(&bearer), ask("refunds")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let (service, _clock) = service(10);
        let operator = format!("ApiKey {KEY}");
        let err = service.issue_session(Some(&operator), "  ").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn test_health_reports_corpus() {
        let (service, _clock) = service(10);
        let health = service.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.passages, 2);
        assert_eq!(health.models_resident, 0);
    }
}
