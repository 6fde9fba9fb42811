//! Health check API endpoint.
//!
//! Provides a simple health check endpoint for monitoring and load balancers.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use beaconwatch_core::{DeliveryPolicy, LifecycleSource};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "coordinator_started": true,
    "policy": "live_or_deferred",
    "suspended": false,
    "started_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether the coordinator is bound to its engine.
    pub coordinator_started: bool,

    /// Delivery policy in effect.
    pub policy: DeliveryPolicy,

    /// Whether events are currently being deferred.
    pub suspended: bool,

    /// When the server started.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub started_at_utc: String,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns basic service status information. Use this endpoint \
        for load balancer health checks and monitoring.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        coordinator_started: state.coordinator.is_started(),
        policy: state.coordinator.dispatcher().policy(),
        suspended: state.lifecycle.is_suspended(),
        started_at_utc: state.started_at.to_rfc3339(),
    })
}
