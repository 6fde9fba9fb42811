//! OpenAPI specification generation for the beaconwatch API.
//!
//! The document is served at `/api/openapi.json`, rendered by Swagger UI at
//! `/docs`, and written to disk by the `gen-openapi` binary for client
//! generation.

use axum::Json;
use utoipa::OpenApi;

use beaconwatch_core::{
    BusEvent, BusPayload, DeferredRecord, DeliveryPolicy, Deregistration, EngineSnapshot,
    EventTag, FilterSettings, ForegroundServiceConfig, MonitoredRegion, MonitoringPayload,
    Proximity, RangingPayload, RawBeacon, RawRegion, RegionKey, RegionState, Registration,
    RssiFilter, ScanPeriods, Sighting,
};

use super::deferred::{DeferredListResponse, FlushResponse};
use super::engine::{RangeCallback, StateCallback};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::lifecycle::{LifecycleResponse, SetLifecycleRequest};
use super::regions::{RegionRequest, StartResponse, StopResponse};
use super::scanner::{
    HardwareEqualityRequest, LayoutBatchRequest, LayoutRequest, RssiFilterRequest,
};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for beaconwatch.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beaconwatch API",
        version = "0.1.0",
        description = r#"
# beaconwatch API

beaconwatch monitors beacon regions and ranges nearby beacons on behalf of a host application.

## Overview

1. **Regions**: start and stop monitoring (enter/exit/state) and ranging (distance estimates) per region
2. **Engine ingest**: an out-of-process scanning engine reports its callbacks here
3. **Delivery**: while an event stream is attached events go live over SSE; otherwise they are
   spooled as deferred records until acknowledged

## Regions

A region is an identifier plus a uuid and optional major/minor filters. Omitted, `null` or `-1`
filters mean "any". Starting a region twice is harmless and stopping an inactive region succeeds.

## Event order

Events for one region are delivered in the order the engine reported them, across live and
deferred delivery.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beaconwatch server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "monitoring", description = "Region monitoring: enter, exit and state"),
        (name = "ranging", description = "Beacon ranging with distance and proximity"),
        (name = "scanner", description = "Scanning engine settings"),
        (name = "engine", description = "Callback ingest from the scanning engine"),
        (name = "events", description = "Live event stream"),
        (name = "lifecycle", description = "Live or suspended delivery"),
        (name = "deferred", description = "Records deferred while suspended")
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Monitoring endpoints
        super::regions::list_monitored,
        super::regions::start_monitoring,
        super::regions::stop_monitoring,
        super::regions::request_state,
        // Ranging endpoints
        super::regions::list_ranged,
        super::regions::start_ranging,
        super::regions::stop_ranging,
        // Scanner endpoints
        super::scanner::get_scanner,
        super::scanner::set_rssi_filter,
        super::scanner::set_scan_periods,
        super::scanner::enable_foreground_service,
        super::scanner::disable_foreground_service,
        super::scanner::add_layout,
        super::scanner::remove_layout,
        super::scanner::add_layouts,
        super::scanner::remove_layouts,
        super::scanner::set_hardware_equality,
        // Engine ingest endpoints
        super::engine::ingest_enter,
        super::engine::ingest_exit,
        super::engine::ingest_state,
        super::engine::ingest_range,
        // Event stream
        super::events::stream_events,
        // Lifecycle endpoints
        super::lifecycle::get_lifecycle,
        super::lifecycle::set_lifecycle,
        // Deferred endpoints
        super::deferred::list_deferred,
        super::deferred::acknowledge_deferred,
        super::deferred::flush_deferred,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Region types
            RegionRequest,
            StartResponse,
            StopResponse,
            RegionKey,
            RegionState,
            MonitoredRegion,
            Registration,
            Deregistration,
            // Scanner types
            EngineSnapshot,
            RssiFilter,
            FilterSettings,
            RssiFilterRequest,
            ScanPeriods,
            ForegroundServiceConfig,
            LayoutRequest,
            LayoutBatchRequest,
            HardwareEqualityRequest,
            // Engine types
            RawRegion,
            RawBeacon,
            StateCallback,
            RangeCallback,
            // Event types
            BusEvent,
            BusPayload,
            MonitoringPayload,
            RangingPayload,
            Sighting,
            Proximity,
            EventTag,
            // Lifecycle types
            DeliveryPolicy,
            LifecycleResponse,
            SetLifecycleRequest,
            // Deferred types
            DeferredRecord,
            DeferredListResponse,
            FlushResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "beaconwatch API");
        assert!(spec.paths.paths.contains_key("/api/monitoring/start"));
        assert!(spec.paths.paths.contains_key("/api/deferred/{id}"));
        assert!(spec.paths.paths.contains_key("/api/scanner/layouts/batch"));
        assert!(spec.paths.paths.contains_key("/api/scanner/hardware-equality"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"beaconwatch API\""));
    }
}
