//! # beaconwatch-core
//!
//! Region monitoring and beacon ranging on behalf of a host application.
//!
//! This crate provides:
//! - A region registry with idempotent start and tolerant stop
//! - Translation of raw scanning-engine callbacks into typed events
//! - Lifecycle-aware delivery: live to a running application, deferred
//!   (at-least-once) while it is suspended
//! - Pass-through scanner settings (RSSI filter, scan periods, layouts,
//!   foreground service)
//!
//! ## Architecture
//!
//! - [`region`] - Region keys, sub-identifier parsing, region state
//! - [`engine`] - The scanning engine interface and a passive implementation
//! - [`translator`] - Engine callbacks to dispatch envelopes, proximity buckets
//! - [`registry`] - Active monitored and ranged regions
//! - [`dispatcher`] - Live/deferred routing with per-region ordering
//! - [`coordinator`] - Command surface tying the above together
//! - [`scanner`] - Engine settings
//! - [`storage`] - File-backed deferred sink
//! - [`config`] - Layered configuration
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod region;
pub mod registry;
pub mod scanner;
pub mod storage;
pub mod translator;
pub mod types;

// Re-export primary types for convenience
pub use self::config::{Config, ConfigError, ConfigResult, DeliveryConfig, ScannerConfig, ServerConfig};
pub use coordinator::Coordinator;
pub use dispatcher::{
    BroadcastBus, DeferredSink, DeliveryPolicy, Dispatcher, EventBus, LifecycleFlag,
    LifecycleSource, RetryPolicy, SubmitError, DEFAULT_DRAIN_TIMEOUT,
};
pub use engine::{
    EngineError, EngineListener, EngineResult, EngineSnapshot, PassiveEngine, RawBeacon,
    RawRegion, ScanEngine,
};
pub use error::{BeaconError, Result};
pub use region::{sub_identifier_arg, RegionKey, RegionState};
pub use registry::{CallbackKind, Deregistration, MonitoredRegion, Registration};
pub use scanner::{
    is_valid_beacon_layout, FilterSettings, ForegroundServiceConfig, RssiFilter, ScanPeriods,
    IBEACON_LAYOUT,
};
pub use storage::{default_data_dir, default_spool_dir, SpoolSink};
pub use types::{
    BusEvent, BusPayload, DeferredRecord, DispatchEnvelope, EventTag, MonitoringPayload,
    Proximity, RangingBatch, RangingPayload, Sighting,
};
