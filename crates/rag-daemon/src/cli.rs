//! CLI argument parsing for the RAG daemon.
//!
//! CLI flags override every other config source.

use clap::{Parser, Subcommand};

/// Default endpoint for client commands
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";

/// RAG query daemon
///
/// Serves authenticated, rate-limited passage retrieval over a local vector store.
#[derive(Parser, Debug)]
#[command(name = "rag-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default <config_dir>/rag-service/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the query server (foreground)
    Start {
        /// Override HTTP port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override bind host
        #[arg(long)]
        host: Option<String>,
    },

    /// Ask a running server for passages
    Ask {
        /// Query text
        query: String,

        /// Passages to return
        #[arg(short, long)]
        k: Option<usize>,

        /// Embedding model override
        #[arg(short, long)]
        model: Option<String>,

        /// Server endpoint
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        /// Session token or API key (default: first configured API key)
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Mint a session token from the configured JWT secret
    IssueToken {
        /// Session subject (user name)
        subject: String,
    },
}
