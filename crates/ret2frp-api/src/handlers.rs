//! Traffic route handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use ret2frp_engine::DeleteOutcome;

use crate::models::{DeleteTrafficRequest, UpdateTrafficRequest};
use crate::{ApiError, AppState};

/// Liveness probe, unauthenticated
pub async fn ping() -> Json<&'static str> {
    Json("pong")
}

/// Create or extend a traffic; responds with the public address per port key
pub async fn update_traffic(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UpdateTrafficRequest>, JsonRejection>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    debug!(
        traffic = %request.service.traffic,
        node_name = %request.node_name,
        ports = request.service.ports.len(),
        "traffic update requested"
    );

    let addrs = state
        .manager
        .update_traffic(&request.node_name, request.service)
        .await
        .map_err(ApiError::Engine)?;
    Ok(Json(addrs))
}

/// Tear a traffic down; responds with the last known address map, if any
pub async fn delete_traffic(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DeleteTrafficRequest>, JsonRejection>,
) -> Result<Json<DeleteOutcome>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    debug!(traffic_id = %request.traffic_id, "traffic delete requested");

    let outcome = state
        .manager
        .delete_traffic(&request.traffic_id)
        .await
        .map_err(ApiError::Engine)?;
    Ok(Json(outcome))
}
