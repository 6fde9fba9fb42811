//! Lifecycle API endpoints.
//!
//! Reports whether events currently go live or to the deferred spool, and
//! lets an operator force the suspended state.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use beaconwatch_core::{DeliveryPolicy, LifecycleSource};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Creates the lifecycle router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_lifecycle).put(set_lifecycle))
}

/// Delivery state of the host.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "suspended": false,
    "manual_suspended": false,
    "live_subscribers": 1,
    "persistent_scanning": false,
    "pending_deferrals": 0,
    "policy": "live_or_deferred"
}))]
pub struct LifecycleResponse {
    /// Whether events are being deferred right now.
    pub suspended: bool,

    /// Whether an operator forced suspension.
    pub manual_suspended: bool,

    /// Attached event streams.
    pub live_subscribers: usize,

    /// Whether the foreground scanning service is enabled.
    pub persistent_scanning: bool,

    /// Deferred records not yet accepted by the spool.
    pub pending_deferrals: usize,

    /// Delivery policy in effect.
    pub policy: DeliveryPolicy,
}

/// Request body for forcing suspension.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"suspended": true}))]
pub struct SetLifecycleRequest {
    /// `true` to defer every event regardless of attached streams.
    pub suspended: bool,
}

fn snapshot(state: &SharedState) -> LifecycleResponse {
    let dispatcher = state.coordinator.dispatcher();
    LifecycleResponse {
        suspended: state.lifecycle.is_suspended(),
        manual_suspended: state.lifecycle.manually_suspended(),
        live_subscribers: state.bus.subscriber_count(),
        persistent_scanning: dispatcher.persistent_scanning(),
        pending_deferrals: dispatcher.pending_deferrals(),
        policy: dispatcher.policy(),
    }
}

/// Get the lifecycle state.
#[utoipa::path(
    get,
    path = "/api/lifecycle",
    tag = "lifecycle",
    operation_id = "getLifecycle",
    summary = "Get lifecycle state",
    responses(
        (status = 200, description = "Lifecycle state", body = LifecycleResponse)
    )
)]
pub async fn get_lifecycle(State(state): State<SharedState>) -> Json<LifecycleResponse> {
    Json(snapshot(&state))
}

/// Force or release suspension.
#[utoipa::path(
    put,
    path = "/api/lifecycle",
    tag = "lifecycle",
    operation_id = "setLifecycle",
    summary = "Force or release suspension",
    description = "While forced, every event goes to the deferred spool even with \
        event streams attached. Releasing returns to automatic detection.",
    request_body = SetLifecycleRequest,
    responses(
        (status = 200, description = "Lifecycle state after the change", body = LifecycleResponse)
    )
)]
pub async fn set_lifecycle(
    State(state): State<SharedState>,
    Json(request): Json<SetLifecycleRequest>,
) -> Json<LifecycleResponse> {
    state.lifecycle.set_suspended(request.suspended);
    Json(snapshot(&state))
}
