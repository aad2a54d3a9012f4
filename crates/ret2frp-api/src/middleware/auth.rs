//! Bearer token authentication
//!
//! Every `/v1` route is guarded by a single shared token from the
//! configuration; callers present it as `Authorization: Bearer {token}`.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

use crate::ApiError;

/// Shared bearer token the orchestrator must present
pub struct AuthState {
    pub token: String,
}

/// Rejects with 401 unless the request carries the configured bearer token
pub async fn require_bearer(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == state.token => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized),
    }
}
