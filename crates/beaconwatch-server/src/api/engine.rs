//! Callback ingest for an out-of-process scanning engine.
//!
//! Each endpoint forwards one engine callback to the coordinator. The
//! coordinator never fails a callback; a region it cannot resolve is logged
//! and dropped, so these endpoints answer 202 once the callback is handed
//! over.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use beaconwatch_core::{RawBeacon, RawRegion};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the engine ingest router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/enter", post(ingest_enter))
        .route("/exit", post(ingest_exit))
        .route("/state", post(ingest_state))
        .route("/range", post(ingest_range))
}

/// A state determination reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "state": 1,
    "region": {"unique_id": "r1", "uuid": "e2c56db5-dffb-48d2-b060-d0f5a71096e0"}
}))]
pub struct StateCallback {
    /// Engine state code: `1` inside, `0` outside, anything else unknown.
    pub state: i32,
    /// Region token.
    pub region: RawRegion,
}

/// A completed ranging cycle reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "beacons": [{"identifiers": ["e2c56db5-dffb-48d2-b060-d0f5a71096e0", "1", "4"], "rssi": -67, "distance": 1.82}],
    "region": {"unique_id": "r1", "uuid": "e2c56db5-dffb-48d2-b060-d0f5a71096e0"}
}))]
pub struct RangeCallback {
    /// Beacons seen this cycle, in engine order.
    #[serde(default)]
    pub beacons: Vec<RawBeacon>,
    /// Region token.
    pub region: RawRegion,
}

/// The device entered a region.
#[utoipa::path(
    post,
    path = "/api/engine/enter",
    tag = "engine",
    operation_id = "ingestEnter",
    summary = "Report a region entry",
    request_body = RawRegion,
    responses(
        (status = 202, description = "Callback accepted"),
        (status = 503, description = "Coordinator not bound", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn ingest_enter(
    State(state): State<SharedState>,
    Json(region): Json<RawRegion>,
) -> ApiResult<StatusCode> {
    debug!(region = %region.unique_id, "Engine enter callback");
    state.engine.emit_enter(region)?;
    Ok(StatusCode::ACCEPTED)
}

/// The device left a region.
#[utoipa::path(
    post,
    path = "/api/engine/exit",
    tag = "engine",
    operation_id = "ingestExit",
    summary = "Report a region exit",
    request_body = RawRegion,
    responses(
        (status = 202, description = "Callback accepted"),
        (status = 503, description = "Coordinator not bound", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn ingest_exit(
    State(state): State<SharedState>,
    Json(region): Json<RawRegion>,
) -> ApiResult<StatusCode> {
    debug!(region = %region.unique_id, "Engine exit callback");
    state.engine.emit_exit(region)?;
    Ok(StatusCode::ACCEPTED)
}

/// The engine determined a region's state.
#[utoipa::path(
    post,
    path = "/api/engine/state",
    tag = "engine",
    operation_id = "ingestState",
    summary = "Report a region state",
    request_body = StateCallback,
    responses(
        (status = 202, description = "Callback accepted"),
        (status = 503, description = "Coordinator not bound", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn ingest_state(
    State(state): State<SharedState>,
    Json(callback): Json<StateCallback>,
) -> ApiResult<StatusCode> {
    debug!(region = %callback.region.unique_id, code = callback.state, "Engine state callback");
    state.engine.emit_state(callback.state, callback.region)?;
    Ok(StatusCode::ACCEPTED)
}

/// A ranging cycle completed.
#[utoipa::path(
    post,
    path = "/api/engine/range",
    tag = "engine",
    operation_id = "ingestRange",
    summary = "Report ranged beacons",
    description = "Distances may be `null`, `\"NaN\"` or `\"Infinity\"` when the engine \
        had no estimate; such beacons are reported with distance 999 and proximity far.",
    request_body = RangeCallback,
    responses(
        (status = 202, description = "Callback accepted"),
        (status = 503, description = "Coordinator not bound", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn ingest_range(
    State(state): State<SharedState>,
    Json(callback): Json<RangeCallback>,
) -> ApiResult<StatusCode> {
    debug!(
        region = %callback.region.unique_id,
        beacons = callback.beacons.len(),
        "Engine range callback"
    );
    state.engine.emit_ranging(callback.beacons, callback.region)?;
    Ok(StatusCode::ACCEPTED)
}
