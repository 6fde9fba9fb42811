//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `regions` - Region monitoring and ranging commands
//! - `scanner` - Scanning engine settings
//! - `engine` - Callback ingest from an out-of-process engine
//! - `events` - Live event stream (SSE)
//! - `lifecycle` - Live/suspended state
//! - `deferred` - Deferred record queue
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod deferred;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod openapi;
pub mod regions;
pub mod scanner;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /docs                  - Swagger UI
/// /api
/// ├── /monitoring        - Monitored regions
/// ├── /ranging           - Ranged regions
/// ├── /scanner           - Engine settings
/// ├── /engine            - Engine callback ingest
/// ├── /events            - Live event stream
/// ├── /lifecycle         - Live/suspended state
/// ├── /deferred          - Deferred record queue
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/monitoring", regions::monitoring_router())
                .nest("/ranging", regions::ranging_router())
                .nest("/scanner", scanner::router())
                .nest("/engine", engine::router())
                .nest("/events", events::router())
                .nest("/lifecycle", lifecycle::router())
                .nest("/deferred", deferred::router()),
        )
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                // The default predicate leaves text/event-stream uncompressed.
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}
