//! Application state shared across handlers.

use std::sync::Arc;

use beaconwatch_core::{
    default_spool_dir, BroadcastBus, Config, Coordinator, Dispatcher, LifecycleFlag,
    LifecycleSource, PassiveEngine, SpoolSink,
};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::info;

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// Lifecycle of the host as seen by the dispatcher.
///
/// Live only while at least one event stream is attached and no manual
/// suspension is set.
#[derive(Debug)]
pub struct HostLifecycle {
    manual: LifecycleFlag,
    bus: Arc<BroadcastBus>,
}

impl HostLifecycle {
    /// Sets or clears the manual suspension.
    pub fn set_suspended(&self, suspended: bool) {
        self.manual.set_suspended(suspended);
    }

    /// Whether a manual suspension is set.
    #[must_use]
    pub fn manually_suspended(&self) -> bool {
        self.manual.is_suspended()
    }
}

impl LifecycleSource for HostLifecycle {
    fn is_suspended(&self) -> bool {
        self.manual.is_suspended() || self.bus.is_suspended()
    }
}

/// Everything a handler can reach.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// The coordinator.
    pub coordinator: Coordinator,
    /// Engine proxy fed by `/api/engine/*`.
    pub engine: Arc<PassiveEngine>,
    /// Live event bus behind `/api/events`.
    pub bus: Arc<BroadcastBus>,
    /// Suspend/resume state.
    pub lifecycle: Arc<HostLifecycle>,
    /// Deferred record spool.
    pub spool: Arc<SpoolSink>,
    /// When the server started.
    pub started_at: DateTime<Utc>,
    /// Signalled once to end open event streams before shutdown.
    pub shutdown: Arc<Notify>,
}

impl AppState {
    /// Builds and starts the coordinator described by `config`.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the spool cannot be opened or the coordinator
    /// refuses a configured scanner setting.
    pub fn new(config: Config) -> anyhow::Result<SharedState> {
        let spool_dir = match &config.delivery.spool_dir {
            Some(dir) => dir.clone(),
            None => default_spool_dir()?,
        };
        let spool = Arc::new(SpoolSink::new(&spool_dir, config.delivery.retry_policy())?);

        let engine = Arc::new(PassiveEngine::new(config.scanner.beacon_layouts.clone()));
        let bus = Arc::new(BroadcastBus::new(config.server.event_buffer));
        let lifecycle = Arc::new(HostLifecycle {
            manual: LifecycleFlag::new(false),
            bus: bus.clone(),
        });

        let dispatcher = Dispatcher::new(
            config.delivery.policy,
            lifecycle.clone(),
            bus.clone(),
            spool.clone(),
        )
        .with_drain_timeout(config.delivery.drain_timeout());
        let coordinator = Coordinator::new(engine.clone(), dispatcher);
        coordinator.start()?;

        coordinator.set_rssi_filter(config.scanner.filter_settings())?;
        coordinator.set_scan_periods(config.scanner.scan_periods)?;
        if config.scanner.hardware_equality_enforced {
            coordinator.set_hardware_equality_enforced(true)?;
        }
        if let Some(service) = config.scanner.foreground_service.clone() {
            coordinator.enable_foreground_scanning(service)?;
        }

        info!(
            spool = %spool_dir.display(),
            policy = ?config.delivery.policy,
            "Application state ready"
        );

        Ok(Arc::new(Self {
            config,
            coordinator,
            engine,
            bus,
            lifecycle,
            spool,
            started_at: Utc::now(),
            shutdown: Arc::new(Notify::new()),
        }))
    }
}
