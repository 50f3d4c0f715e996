//! # rag-admission
//!
//! Request admission for the RAG query service: who is calling, and may they
//! call now.
//!
//! - [`SessionAuthenticator`]: resolves API keys and session tokens to an
//!   [`Identity`](rag_types::Identity); every failure is the same
//!   [`AuthError::Unauthenticated`]
//! - [`RateLimiter`]: per-identity token bucket with lazy refill; a denial
//!   spends nothing

pub mod auth;
pub mod rate_limit;

pub use auth::{
    key_fingerprint, AuthConfig, AuthError, Credential, IssuedSession, SessionAuthenticator,
    SessionClaims, SESSION_TOKEN_TYPE,
};
pub use rate_limit::{Decision, RateLimitConfig, RateLimiter, RATE_WINDOW};
