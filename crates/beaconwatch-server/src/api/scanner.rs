//! Scanner settings API endpoints.
//!
//! Thin pass-throughs to the scanning engine. Validation happens in the
//! coordinator; rejected settings surface as `invalid_scanner_setting`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use beaconwatch_core::{
    EngineSnapshot, FilterSettings, ForegroundServiceConfig, RssiFilter, ScanPeriods,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the scanner router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_scanner))
        .route("/rssi-filter", put(set_rssi_filter))
        .route("/scan-periods", put(set_scan_periods))
        .route(
            "/foreground-service",
            put(enable_foreground_service).delete(disable_foreground_service),
        )
        .route("/hardware-equality", put(set_hardware_equality))
        .route("/layouts", post(add_layout).delete(remove_layout))
        .route("/layouts/batch", post(add_layouts).delete(remove_layouts))
}

// ============================================================================
// Request Types
// ============================================================================

/// Request body for selecting the RSSI filter.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "filter": "arma",
    "tuning": 0.1
}))]
pub struct RssiFilterRequest {
    /// Filter kind.
    pub filter: RssiFilter,

    /// Sample expiration (ms) or ARMA speed. Values `<= 0` keep the engine default.
    #[serde(default)]
    pub tuning: f64,
}

/// Request body naming a beacon layout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "layout": "m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25"
}))]
pub struct LayoutRequest {
    /// Layout expression in the engine's parser syntax.
    pub layout: String,
}

/// Request body naming several beacon layouts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "layouts": [
        "m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25",
        "s:0-1=feaa,m:2-2=00,p:3-3,i:4-13,i:14-19"
    ]
}))]
pub struct LayoutBatchRequest {
    /// Layout expressions in the engine's parser syntax.
    pub layouts: Vec<String>,
}

/// Request body toggling hardware equality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"enforced": true}))]
pub struct HardwareEqualityRequest {
    /// Include the transmitter's hardware address in beacon identity.
    pub enforced: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Current scanner settings.
#[utoipa::path(
    get,
    path = "/api/scanner",
    tag = "scanner",
    operation_id = "getScanner",
    summary = "Get scanner state",
    description = "Returns what the scanning engine has been told: active regions, \
        pending state requests, filter, scan periods, foreground service and layouts. \
        An out-of-process engine polls this to learn what to scan for.",
    responses(
        (status = 200, description = "Engine snapshot", body = EngineSnapshot)
    )
)]
pub async fn get_scanner(State(state): State<SharedState>) -> Json<EngineSnapshot> {
    Json(state.engine.snapshot())
}

/// Select the RSSI smoothing filter.
#[utoipa::path(
    put,
    path = "/api/scanner/rssi-filter",
    tag = "scanner",
    operation_id = "setRssiFilter",
    summary = "Select the RSSI filter",
    request_body = RssiFilterRequest,
    responses(
        (status = 200, description = "Filter applied", body = FilterSettings),
        (status = 424, description = "Engine refused the filter", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn set_rssi_filter(
    State(state): State<SharedState>,
    Json(request): Json<RssiFilterRequest>,
) -> ApiResult<Json<FilterSettings>> {
    let settings = FilterSettings::new(request.filter, request.tuning);
    state.coordinator.set_rssi_filter(settings)?;
    Ok(Json(settings))
}

/// Set scan and between-scan periods.
#[utoipa::path(
    put,
    path = "/api/scanner/scan-periods",
    tag = "scanner",
    operation_id = "setScanPeriods",
    summary = "Set scan periods",
    description = "Sets foreground and background scan windows and the pauses between \
        them, in milliseconds. Omitted fields take their defaults.",
    request_body = ScanPeriods,
    responses(
        (status = 200, description = "Periods applied", body = ScanPeriods),
        (status = 400, description = "Zero scan window", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn set_scan_periods(
    State(state): State<SharedState>,
    Json(periods): Json<ScanPeriods>,
) -> ApiResult<Json<ScanPeriods>> {
    state.coordinator.set_scan_periods(periods)?;
    Ok(Json(periods))
}

/// Enable the persistent foreground scanning service.
#[utoipa::path(
    put,
    path = "/api/scanner/foreground-service",
    tag = "scanner",
    operation_id = "enableForegroundScanning",
    summary = "Enable foreground scanning",
    description = "Keeps scanning alive while the host is suspended, showing the given \
        notification.",
    request_body = ForegroundServiceConfig,
    responses(
        (status = 200, description = "Service enabled", body = ForegroundServiceConfig),
        (status = 400, description = "Incomplete notification", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn enable_foreground_service(
    State(state): State<SharedState>,
    Json(config): Json<ForegroundServiceConfig>,
) -> ApiResult<Json<ForegroundServiceConfig>> {
    state.coordinator.enable_foreground_scanning(config.clone())?;
    Ok(Json(config))
}

/// Disable the persistent foreground scanning service.
#[utoipa::path(
    delete,
    path = "/api/scanner/foreground-service",
    tag = "scanner",
    operation_id = "disableForegroundScanning",
    summary = "Disable foreground scanning",
    responses(
        (status = 204, description = "Service disabled")
    )
)]
pub async fn disable_foreground_service(
    State(state): State<SharedState>,
) -> ApiResult<StatusCode> {
    state.coordinator.disable_foreground_scanning()?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a beacon layout.
#[utoipa::path(
    post,
    path = "/api/scanner/layouts",
    tag = "scanner",
    operation_id = "addBeaconLayout",
    summary = "Add a beacon layout",
    request_body = LayoutRequest,
    responses(
        (status = 200, description = "Layouts now registered", body = Vec<String>),
        (status = 400, description = "Malformed layout", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn add_layout(
    State(state): State<SharedState>,
    Json(request): Json<LayoutRequest>,
) -> ApiResult<Json<Vec<String>>> {
    state.coordinator.add_beacon_layout(&request.layout)?;
    Ok(Json(state.engine.snapshot().beacon_layouts))
}

/// Remove a beacon layout.
#[utoipa::path(
    delete,
    path = "/api/scanner/layouts",
    tag = "scanner",
    operation_id = "removeBeaconLayout",
    summary = "Remove a beacon layout",
    request_body = LayoutRequest,
    responses(
        (status = 200, description = "Layouts now registered", body = Vec<String>)
    )
)]
pub async fn remove_layout(
    State(state): State<SharedState>,
    Json(request): Json<LayoutRequest>,
) -> ApiResult<Json<Vec<String>>> {
    state.coordinator.remove_beacon_layout(&request.layout)?;
    Ok(Json(state.engine.snapshot().beacon_layouts))
}

/// Add several beacon layouts.
#[utoipa::path(
    post,
    path = "/api/scanner/layouts/batch",
    tag = "scanner",
    operation_id = "addBeaconLayouts",
    summary = "Add beacon layouts",
    description = "Every layout is validated first; one malformed entry rejects the \
        whole batch and nothing is added.",
    request_body = LayoutBatchRequest,
    responses(
        (status = 200, description = "Layouts now registered", body = Vec<String>),
        (status = 400, description = "Malformed layout", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn add_layouts(
    State(state): State<SharedState>,
    Json(request): Json<LayoutBatchRequest>,
) -> ApiResult<Json<Vec<String>>> {
    state.coordinator.add_beacon_layouts(&request.layouts)?;
    Ok(Json(state.engine.snapshot().beacon_layouts))
}

/// Remove several beacon layouts.
#[utoipa::path(
    delete,
    path = "/api/scanner/layouts/batch",
    tag = "scanner",
    operation_id = "removeBeaconLayouts",
    summary = "Remove beacon layouts",
    request_body = LayoutBatchRequest,
    responses(
        (status = 200, description = "Layouts now registered", body = Vec<String>)
    )
)]
pub async fn remove_layouts(
    State(state): State<SharedState>,
    Json(request): Json<LayoutBatchRequest>,
) -> ApiResult<Json<Vec<String>>> {
    state.coordinator.remove_beacon_layouts(&request.layouts)?;
    Ok(Json(state.engine.snapshot().beacon_layouts))
}

/// Toggle hardware equality.
#[utoipa::path(
    put,
    path = "/api/scanner/hardware-equality",
    tag = "scanner",
    operation_id = "setHardwareEquality",
    summary = "Set hardware equality enforcement",
    description = "When enforced, two transmitters advertising the same identifiers \
        are reported as separate beacons.",
    request_body = HardwareEqualityRequest,
    responses(
        (status = 200, description = "Setting applied", body = HardwareEqualityRequest)
    )
)]
pub async fn set_hardware_equality(
    State(state): State<SharedState>,
    Json(request): Json<HardwareEqualityRequest>,
) -> ApiResult<Json<HardwareEqualityRequest>> {
    state
        .coordinator
        .set_hardware_equality_enforced(request.enforced)?;
    Ok(Json(HardwareEqualityRequest {
        enforced: state.engine.snapshot().hardware_equality_enforced,
    }))
}
