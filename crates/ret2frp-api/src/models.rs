//! Request bodies for the traffic routes
//!
//! Schemas are strict: unknown fields are rejected so schema drift between
//! the orchestrator and this controller fails loudly instead of silently.

use serde::Deserialize;

use ret2frp_engine::Service;

/// Body of `POST /v1/traffic`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTrafficRequest {
    pub node_name: String,
    pub service: Service,
}

/// Body of `DELETE /v1/traffic`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteTrafficRequest {
    pub traffic_id: String,
}
