//! RAG Daemon
//!
//! Authenticated, rate-limited passage retrieval over a local vector store.
//!
//! # Usage
//!
//! ```bash
//! rag-daemon start [--port PORT] [--host HOST]
//! rag-daemon ask "What is the refund policy?" [--k N] [--endpoint URL] [--token T]
//! rag-daemon issue-token alice
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (<config_dir>/rag-service/config.toml)
//! 3. Environment variables (MODEL_CACHE_SIZE, JWT_SECRET, ...)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use rag_daemon::{ask, init_logging, issue_token, start_daemon, Cli, Commands};
use rag_service::AskRequest;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port, host } => {
            start_daemon(
                cli.config.as_deref(),
                port,
                host.as_deref(),
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Ask {
            query,
            k,
            model,
            endpoint,
            token,
        } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"))?;
            let request = AskRequest {
                query_text: query,
                k,
                model,
            };
            ask(cli.config.as_deref(), &endpoint, request, token.as_deref()).await?;
        }
        Commands::IssueToken { subject } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"))?;
            issue_token(cli.config.as_deref(), &subject)?;
        }
    }

    Ok(())
}
