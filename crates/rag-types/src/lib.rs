//! # rag-types
//!
//! Shared domain types for the RAG query service.
//!
//! This crate defines the data structures used across the serving path:
//! - Passages: immutable corpus chunks with their source reference
//! - Identities: resolved callers admitted by the authenticator
//! - Clock: injectable time source for TTL and rate-limit decisions
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use rag_types::{Clock, ManualClock, Passage, SourceRef};
//!
//! let clock = ManualClock::new(1_000);
//! assert_eq!(clock.now_ms(), 1_000);
//!
//! let passage = Passage::new("doc-1", "Refunds are issued within 30 days.", SourceRef::new("policy.pdf", 0));
//! assert_eq!(passage.doc_id, "doc-1");
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod passage;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Settings;
pub use error::ConfigError;
pub use identity::{Identity, IdentityKind};
pub use passage::{Passage, SourceRef};
