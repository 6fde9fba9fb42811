//! Deferred record queue.
//!
//! Records deferred while the host was suspended wait in the spool until a
//! consumer reads and acknowledges them. Delivery is at-least-once: a record
//! stays listed until it is deleted here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use beaconwatch_core::DeferredRecord;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the deferred queue router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_deferred))
        .route("/flush", post(flush_deferred))
        .route("/{id}", delete(acknowledge_deferred))
}

/// Spooled records, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeferredListResponse {
    /// Records awaiting acknowledgement.
    pub records: Vec<DeferredRecord>,
    /// Number of records.
    pub count: usize,
}

/// Result of a flush.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"drained": true, "pending_deferrals": 0, "spooled": 3}))]
pub struct FlushResponse {
    /// `false` if the drain timeout expired with deferrals still pending.
    pub drained: bool,
    /// Deferrals still waiting for the spool.
    pub pending_deferrals: usize,
    /// Records in the spool after the flush.
    pub spooled: usize,
}

/// List spooled records.
#[utoipa::path(
    get,
    path = "/api/deferred",
    tag = "deferred",
    operation_id = "listDeferred",
    summary = "List deferred records",
    description = "Returns every record deferred while the host was suspended and not yet \
        acknowledged, oldest first. Records carry a time-ordered `id` for de-duplication.",
    responses(
        (status = 200, description = "Spooled records", body = DeferredListResponse),
        (status = 500, description = "Spool unreadable", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn list_deferred(
    State(state): State<SharedState>,
) -> ApiResult<Json<DeferredListResponse>> {
    let records = state.spool.pending()?;
    Ok(Json(DeferredListResponse {
        count: records.len(),
        records,
    }))
}

/// Acknowledge a spooled record.
#[utoipa::path(
    delete,
    path = "/api/deferred/{id}",
    tag = "deferred",
    operation_id = "acknowledgeDeferred",
    summary = "Acknowledge a deferred record",
    params(
        ("id" = String, Path, description = "Record id")
    ),
    responses(
        (status = 204, description = "Record removed"),
        (status = 404, description = "No such record", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn acknowledge_deferred(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.spool.acknowledge(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Wait for in-flight deferrals to reach the spool.
#[utoipa::path(
    post,
    path = "/api/deferred/flush",
    tag = "deferred",
    operation_id = "flushDeferred",
    summary = "Flush pending deferrals",
    description = "Waits until every event deferred before the call has been written \
        to the spool or abandoned, for at most `delivery.drain_timeout_ms`. `drained` \
        is false when the wait timed out.",
    responses(
        (status = 200, description = "Flush complete", body = FlushResponse),
        (status = 500, description = "Spool unreadable", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn flush_deferred(State(state): State<SharedState>) -> ApiResult<Json<FlushResponse>> {
    let dispatcher = state.coordinator.dispatcher();
    let drained = dispatcher.flush().await;
    Ok(Json(FlushResponse {
        drained,
        pending_deferrals: dispatcher.pending_deferrals(),
        spooled: state.spool.pending()?.len(),
    }))
}
