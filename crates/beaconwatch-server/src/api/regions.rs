//! Region monitoring and ranging API endpoints.
//!
//! Start requests are idempotent and stop requests for inactive regions
//! succeed, so clients can retry freely. `major`/`minor` may be omitted,
//! `null` or `-1` to match any value.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use beaconwatch_core::{
    sub_identifier_arg, Deregistration, MonitoredRegion, RegionKey, Registration,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the monitoring router.
pub fn monitoring_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_monitored))
        .route("/start", post(start_monitoring))
        .route("/stop", post(stop_monitoring))
        .route("/state", post(request_state))
}

/// Creates the ranging router.
pub fn ranging_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_ranged))
        .route("/start", post(start_ranging))
        .route("/stop", post(stop_ranging))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// A region as named by a client.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": "lobby",
    "uuid": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
    "major": 1,
    "minor": -1
}))]
pub struct RegionRequest {
    /// Caller-chosen unique key.
    #[schema(example = "lobby", min_length = 1)]
    pub identifier: String,

    /// Region uuid, hyphenated or simple form.
    #[schema(example = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0")]
    pub uuid: String,

    /// Major filter; omitted, `null` or `-1` for any.
    #[serde(default)]
    pub major: Option<i64>,

    /// Minor filter; omitted, `null` or `-1` for any.
    #[serde(default)]
    pub minor: Option<i64>,
}

impl RegionRequest {
    /// `(minor, major)` in the string form the coordinator parses.
    fn sub_identifiers(&self) -> (String, String) {
        (sub_identifier_arg(self.minor), sub_identifier_arg(self.major))
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "identifier": "lobby",
    "outcome": "added"
}))]
pub struct StartResponse {
    /// Region identifier.
    pub identifier: String,
    /// What the request changed.
    pub outcome: Registration,
}

/// Result of a stop request.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "identifier": "lobby",
    "outcome": "removed"
}))]
pub struct StopResponse {
    /// Region identifier.
    pub identifier: String,
    /// What the request changed.
    pub outcome: Deregistration,
}

// ============================================================================
// Monitoring
// ============================================================================

/// List monitored regions.
#[utoipa::path(
    get,
    path = "/api/monitoring",
    tag = "monitoring",
    operation_id = "listMonitoredRegions",
    summary = "List monitored regions",
    description = "Returns every monitored region with its last known state, \
        sorted by identifier.",
    responses(
        (status = 200, description = "Monitored regions", body = Vec<MonitoredRegion>)
    )
)]
pub async fn list_monitored(State(state): State<SharedState>) -> Json<Vec<MonitoredRegion>> {
    Json(state.coordinator.monitored_regions())
}

/// Start monitoring a region.
#[utoipa::path(
    post,
    path = "/api/monitoring/start",
    tag = "monitoring",
    operation_id = "startMonitoring",
    summary = "Start monitoring a region",
    description = "Registers a region for enter/exit/state events. Re-issuing \
        with the same identifier never duplicates it; a changed filter replaces \
        the entry and resets its state to unknown.",
    request_body = RegionRequest,
    responses(
        (status = 200, description = "Monitoring active", body = StartResponse),
        (status = 400, description = "Malformed region", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn start_monitoring(
    State(state): State<SharedState>,
    Json(request): Json<RegionRequest>,
) -> ApiResult<Json<StartResponse>> {
    let (minor, major) = request.sub_identifiers();
    let outcome =
        state
            .coordinator
            .start_monitoring(&request.identifier, &request.uuid, &minor, &major)?;
    Ok(Json(StartResponse {
        identifier: request.identifier,
        outcome,
    }))
}

/// Stop monitoring a region.
#[utoipa::path(
    post,
    path = "/api/monitoring/stop",
    tag = "monitoring",
    operation_id = "stopMonitoring",
    summary = "Stop monitoring a region",
    description = "Stops monitoring. Stopping a region that is not monitored succeeds \
        with outcome `not_active`.",
    request_body = RegionRequest,
    responses(
        (status = 200, description = "Monitoring stopped", body = StopResponse),
        (status = 400, description = "Malformed region", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn stop_monitoring(
    State(state): State<SharedState>,
    Json(request): Json<RegionRequest>,
) -> ApiResult<Json<StopResponse>> {
    let (minor, major) = request.sub_identifiers();
    let outcome =
        state
            .coordinator
            .stop_monitoring(&request.identifier, &request.uuid, &minor, &major)?;
    Ok(Json(StopResponse {
        identifier: request.identifier,
        outcome,
    }))
}

/// Ask the engine for a region's state.
#[utoipa::path(
    post,
    path = "/api/monitoring/state",
    tag = "monitoring",
    operation_id = "requestStateForRegion",
    summary = "Request the state of a region",
    description = "Asks the scanning engine to determine whether the device is inside \
        the region. The answer arrives later as a `didDetermineState` event.",
    request_body = RegionRequest,
    responses(
        (status = 202, description = "Request forwarded to the engine"),
        (status = 400, description = "Malformed region", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn request_state(
    State(state): State<SharedState>,
    Json(request): Json<RegionRequest>,
) -> ApiResult<StatusCode> {
    let (minor, major) = request.sub_identifiers();
    state
        .coordinator
        .request_state_for_region(&request.identifier, &request.uuid, &minor, &major)?;
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Ranging
// ============================================================================

/// List ranged regions.
#[utoipa::path(
    get,
    path = "/api/ranging",
    tag = "ranging",
    operation_id = "listRangedRegions",
    summary = "List ranged regions",
    responses(
        (status = 200, description = "Ranged regions", body = Vec<RegionKey>)
    )
)]
pub async fn list_ranged(State(state): State<SharedState>) -> Json<Vec<RegionKey>> {
    Json(state.coordinator.ranged_regions())
}

/// Start ranging beacons in a region.
#[utoipa::path(
    post,
    path = "/api/ranging/start",
    tag = "ranging",
    operation_id = "startRanging",
    summary = "Start ranging a region",
    description = "Registers a region for periodic `beaconsDidRange` events.",
    request_body = RegionRequest,
    responses(
        (status = 200, description = "Ranging active", body = StartResponse),
        (status = 400, description = "Malformed region", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn start_ranging(
    State(state): State<SharedState>,
    Json(request): Json<RegionRequest>,
) -> ApiResult<Json<StartResponse>> {
    let (minor, major) = request.sub_identifiers();
    let outcome =
        state
            .coordinator
            .start_ranging(&request.identifier, &request.uuid, &minor, &major)?;
    Ok(Json(StartResponse {
        identifier: request.identifier,
        outcome,
    }))
}

/// Stop ranging a region.
#[utoipa::path(
    post,
    path = "/api/ranging/stop",
    tag = "ranging",
    operation_id = "stopRanging",
    summary = "Stop ranging a region",
    request_body = RegionRequest,
    responses(
        (status = 200, description = "Ranging stopped", body = StopResponse),
        (status = 400, description = "Malformed region", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn stop_ranging(
    State(state): State<SharedState>,
    Json(request): Json<RegionRequest>,
) -> ApiResult<Json<StopResponse>> {
    let (minor, major) = request.sub_identifiers();
    let outcome =
        state
            .coordinator
            .stop_ranging(&request.identifier, &request.uuid, &minor, &major)?;
    Ok(Json(StopResponse {
        identifier: request.identifier,
        outcome,
    }))
}
