//! # rag-service
//!
//! The query-serving layer: request admission, bounded retrieval and the HTTP
//! API in front of them.
//!
//! - [`QueryService`]: authenticate, rate-limit, then retrieve under the
//!   request timeout
//! - [`ServiceError`]: the error taxonomy and its HTTP status mapping
//! - [`router`] / [`run_server_with_shutdown`]: axum routes and server

pub mod error;
pub mod http;
pub mod query;
pub mod server;
pub mod types;

pub use error::{ErrorBody, ServiceError};
pub use http::{router, REQUEST_ID_HEADER};
pub use query::{
    QueryService, QueryServiceConfig, RequestStage, ServiceMetrics, ServiceMetricsSnapshot,
};
pub use server::{run_server_with_shutdown, serve};
pub use types::{
    AskRequest, AskResponse, HealthResponse, PassageView, RevokeResponse, SessionRequest,
    SessionResponse,
};
