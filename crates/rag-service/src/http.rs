//! HTTP routes.
//!
//! | Method   | Path                  | Auth     |
//! |----------|-----------------------|----------|
//! | `POST`   | `/api/ask`            | any      |
//! | `POST`   | `/api/sessions`       | API key  |
//! | `DELETE` | `/api/sessions/{id}`  | API key  |
//! | `GET`    | `/health`             | none     |

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tracing::{info_span, Instrument};
use ulid::Ulid;

use crate::error::ServiceError;
use crate::query::QueryService;
use crate::types::{
    AskRequest, AskResponse, HealthResponse, RevokeResponse, SessionRequest, SessionResponse,
};

/// Correlation header set on every response.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 128;

/// Build the API router.
pub fn router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/api/ask", post(ask))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", delete(revoke_session))
        .route("/health", get(health))
        .layer(middleware::from_fn(request_id))
        .with_state(service)
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

fn invalid_body(rejection: JsonRejection) -> ServiceError {
    ServiceError::InvalidRequest(rejection.body_text())
}

async fn ask(
    State(service): State<Arc<QueryService>>,
    headers: HeaderMap,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ServiceError> {
    let identity = service.admit(authorization(&headers))?;
    let Json(request) = payload.map_err(invalid_body)?;
    let response = service.serve(&identity, request).await?;
    Ok(Json(response))
}

async fn create_session(
    State(service): State<Arc<QueryService>>,
    headers: HeaderMap,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ServiceError> {
    let identity = service.admit_operator(authorization(&headers))?;
    let Json(request) = payload.map_err(invalid_body)?;
    let session = service.mint_session(&identity, &request.subject)?;
    Ok(Json(session))
}

async fn revoke_session(
    State(service): State<Arc<QueryService>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<RevokeResponse>, ServiceError> {
    let revoked = service.revoke_session(authorization(&headers), &session_id)?;
    Ok(Json(revoked))
}

async fn health(State(service): State<Arc<QueryService>>) -> Json<HealthResponse> {
    Json(service.health())
}

/// Tag each request with an id (the caller's, if sane) and run it in a span.
async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Ulid::new().to_string());

    let span = info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
