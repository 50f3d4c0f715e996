//! Command implementations for the RAG daemon.
//!
//! Handles:
//! - start: load config, open the vector store, build the service, serve HTTP
//! - ask: call a running server and print ranked passages
//! - issue-token: mint a session token from the configured secret

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use rag_admission::{AuthConfig, RateLimitConfig, RateLimiter, SessionAuthenticator};
use rag_embeddings::{CandleLoader, ModelCache, ModelCacheConfig, ModelFiles, ModelLoader};
use rag_retrieval::{BlockingSearch, PipelineConfig, RetrievalPipeline};
use rag_service::{
    run_server_with_shutdown, AskRequest, AskResponse, ErrorBody, QueryService,
    QueryServiceConfig,
};
use rag_types::{Settings, SharedClock, SystemClock};
use rag_vector::{PersistentIndex, VectorIndex};

/// How often the model cache is swept
const MODEL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How often idle rate buckets and stale revocations are purged
const ADMISSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// How often the vector store is checked for newly ingested passages
const INDEX_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Load settings and apply the global log-level override.
fn load_settings(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

fn auth_config(settings: &Settings) -> AuthConfig {
    AuthConfig {
        api_keys: settings
            .api_keys()
            .into_iter()
            .map(SecretString::from)
            .collect(),
        jwt_secret: settings.jwt_secret.clone().map(SecretString::from),
        session_expiry: settings.session_expiry(),
    }
}

/// Wire the serving components from settings.
pub fn build_service(
    settings: &Settings,
    index: Arc<dyn VectorIndex>,
    loader: Arc<dyn ModelLoader>,
    clock: SharedClock,
) -> Arc<QueryService> {
    let models = ModelCache::new(
        loader,
        ModelCacheConfig {
            capacity: settings.model_cache_size,
            ttl: settings.model_cache_ttl(),
        },
        clock.clone(),
    );

    let pipeline = RetrievalPipeline::new(
        models,
        Arc::new(BlockingSearch::new(index)),
        PipelineConfig {
            default_model: settings.embedding_model.clone(),
            max_top_k: settings.max_top_k,
            overfetch_factor: settings.overfetch_factor,
            dedup_threshold: settings.dedup_threshold,
            max_distance: settings.max_distance,
            result_cache_ttl: settings.result_cache_ttl(),
            result_cache_size: settings.result_cache_size,
            ..Default::default()
        },
        clock.clone(),
    );

    let auth = SessionAuthenticator::new(auth_config(settings), clock.clone());
    let limiter = RateLimiter::new(
        RateLimitConfig {
            capacity: settings.max_requests_per_minute,
            idle_ttl: settings.bucket_idle_ttl(),
            ..Default::default()
        },
        clock,
    );

    Arc::new(QueryService::new(
        Arc::new(auth),
        Arc::new(limiter),
        Arc::new(pipeline),
        QueryServiceConfig {
            request_timeout: settings.request_timeout(),
            default_top_k: settings.default_top_k,
        },
    ))
}

/// Periodic cleanup of the model cache and admission state.
fn spawn_sweepers(service: &Arc<QueryService>) -> Vec<JoinHandle<()>> {
    let models = service.pipeline().models().spawn_sweeper(MODEL_SWEEP_INTERVAL);

    let admission = {
        let service = Arc::clone(service);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ADMISSION_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.limiter().cleanup();
                service.auth().purge_revoked();
            }
        })
    };

    vec![models, admission]
}

/// Periodically reload the store when ingestion has saved new passages.
///
/// A failed reload keeps the previous generation serving.
fn spawn_index_refresher(index: Arc<PersistentIndex>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let index = Arc::clone(&index);
            match tokio::task::spawn_blocking(move || index.refresh()).await {
                Ok(Ok(true)) => info!("Vector store reloaded"),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!("Vector store reload failed: {}", e),
                Err(e) => warn!("Vector store reload task failed: {}", e),
            }
        }
    })
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the query server.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open the persistent vector store read-only
/// 3. Build the service, its sweepers and the store refresher
/// 4. Serve until SIGINT/SIGTERM
pub async fn start_daemon(
    config_path: Option<&str>,
    port_override: Option<u16>,
    host_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level_override)?;
    if let Some(port) = port_override {
        settings.api_port = port;
    }
    if let Some(host) = host_override {
        settings.api_host = host.to_string();
    }

    init_logging(&settings.log_level)?;

    info!("RAG daemon starting...");
    info!("Configuration:");
    info!("  Vector store: {:?}", settings.chroma_db_path());
    info!("  Meta index: {:?}", settings.meta_index_path());
    info!("  Model dir: {:?}", settings.model_dir());
    info!("  Default model: {}", settings.embedding_model);
    info!("  HTTP address: {}", settings.api_addr());
    info!("  Log level: {}", settings.log_level);

    if settings.api_keys().is_empty() && settings.jwt_secret.is_none() {
        warn!("No API_KEY or JWT_SECRET configured; every query will be rejected");
    }

    let meta_index_path = settings.meta_index_path();
    let index = PersistentIndex::open(settings.chroma_db_path(), Some(&meta_index_path))
        .map(Arc::new)
        .context("Failed to open vector store")?;
    if index.manifest().model_id != settings.embedding_model {
        warn!(
            "Vector store was built with {} but the default model is {}; default queries will be rejected",
            index.manifest().model_id,
            settings.embedding_model
        );
    }
    info!("Vector store holds {} passages", index.len());

    let loader = CandleLoader::new(ModelFiles::new(settings.model_dir()));
    let service = build_service(
        &settings,
        Arc::clone(&index) as Arc<dyn VectorIndex>,
        Arc::new(loader),
        SystemClock::shared(),
    );

    let addr: SocketAddr = settings
        .api_addr()
        .parse()
        .context("Invalid HTTP address")?;

    let mut sweepers = spawn_sweepers(&service);
    sweepers.push(spawn_index_refresher(index, INDEX_REFRESH_INTERVAL));
    let result = run_server_with_shutdown(addr, Arc::clone(&service), shutdown_signal()).await;

    for sweeper in sweepers {
        sweeper.abort();
    }
    info!("Final metrics: {:?}", service.metrics());

    result.map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

/// Value for the `Authorization` header.
///
/// An explicit token is sent as a bearer credential; otherwise the first
/// configured API key is used.
fn authorization_header(token: Option<&str>, settings: Option<&Settings>) -> Option<String> {
    if let Some(token) = token {
        return Some(format!("Bearer {}", token.trim()));
    }
    settings
        .and_then(|s| s.api_keys().into_iter().next())
        .map(|key| format!("ApiKey {key}"))
}

/// Call `POST /api/ask` on a running server and print the passages.
pub async fn ask(
    config_path: Option<&str>,
    endpoint: &str,
    request: AskRequest,
    token: Option<&str>,
) -> Result<()> {
    let settings = if token.is_none() {
        Some(load_settings(config_path, None)?)
    } else {
        None
    };
    let authorization = authorization_header(token, settings.as_ref())
        .context("No --token given and no API_KEY configured")?;

    let url = format!("{}/api/ask", endpoint.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .header(reqwest::header::AUTHORIZATION, authorization)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body: ErrorBody = response
            .json()
            .await
            .with_context(|| format!("Request failed with status {status}"))?;
        anyhow::bail!("{} ({}): {}", status, body.error, body.message);
    }

    let answer: AskResponse = response.json().await.context("Malformed response")?;
    print!("{}", format_answer(&answer));
    Ok(())
}

fn format_answer(answer: &AskResponse) -> String {
    let mut out = format!(
        "{} passage(s) from {} in {}ms\n",
        answer.passages.len(),
        answer.model,
        answer.elapsed_ms
    );
    for (rank, passage) in answer.passages.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. {} [{}@{}] distance {:.4}\n   {}\n",
            rank + 1,
            passage.doc_id,
            passage.source.file,
            passage.source.offset,
            passage.distance,
            passage.text.replace('\n', "\n   ")
        ));
    }
    out
}

/// Mint a session token locally and print it.
pub fn issue_token(config_path: Option<&str>, subject: &str) -> Result<()> {
    let settings = load_settings(config_path, None)?;
    if settings.jwt_secret.is_none() {
        anyhow::bail!("JWT_SECRET is not configured; session tokens are disabled");
    }

    let auth = SessionAuthenticator::new(auth_config(&settings), SystemClock::shared());
    let session = auth
        .issue_session(subject)
        .context("Failed to issue session token")?;

    let expires = chrono::DateTime::from_timestamp_millis(session.expires_at_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| session.expires_at_ms.to_string());

    println!("{}", session.token);
    eprintln!("session {} for {} expires {}", session.session_id, subject, expires);
    Ok(())
}
