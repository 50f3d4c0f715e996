//! RAG daemon library exports.
//!
//! This crate provides the `rag-daemon` binary for the RAG query service.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, ask, issue-token)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, DEFAULT_ENDPOINT};
pub use commands::{ask, build_service, init_logging, issue_token, start_daemon};
