//! HTTP server setup with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::http::router;
use crate::query::QueryService;

/// Bind `addr` and serve until `shutdown_signal` resolves.
pub async fn run_server_with_shutdown<F>(
    addr: SocketAddr,
    service: Arc<QueryService>,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!("Starting HTTP server on {} (with graceful shutdown)", addr);
    let listener = TcpListener::bind(addr).await?;
    serve(listener, service, shutdown_signal).await
}

/// Serve on an already bound listener.
///
/// In-flight requests are allowed to finish once shutdown begins.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<QueryService>,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("HTTP server ready on {}", addr);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}
