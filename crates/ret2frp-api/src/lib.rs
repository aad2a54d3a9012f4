//! HTTP surface of the ret2frp controller
//!
//! `GET /ping` is public; everything under `/v1` requires the configured
//! bearer token. Success bodies are JSON, failure bodies are plain text
//! carrying the error message with a status from the error taxonomy.

pub mod handlers;
pub mod middleware;
pub mod models;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use ret2frp_engine::{EngineError, TrafficManager};

/// Application state shared across handlers
pub struct AppState {
    pub manager: Arc<TrafficManager>,
}

/// Build the router with all routes
pub fn router(manager: Arc<TrafficManager>, auth_token: impl Into<String>) -> Router {
    let state = Arc::new(AppState { manager });
    let auth = Arc::new(middleware::AuthState {
        token: auth_token.into(),
    });

    let protected = Router::new()
        .route(
            "/traffic",
            post(handlers::update_traffic).delete(handlers::delete_traffic),
        )
        .layer(axum_middleware::from_fn_with_state(
            auth,
            middleware::require_bearer,
        ))
        .with_state(state);

    Router::new()
        .route("/ping", get(handlers::ping))
        .nest("/v1", protected)
        .layer(TraceLayer::new_for_http())
}

/// Error rendered to callers
pub enum ApiError {
    /// Body was not JSON or failed the schema
    BadRequest(String),
    /// Bearer token missing or wrong
    Unauthorized,
    /// Engine fault, mapped through the error taxonomy
    Engine(EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Engine(err) => (engine_status(&err), err.to_string()),
        };
        (status, message).into_response()
    }
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
