//! The Region & Ranging Coordinator.
//!
//! Owns the engine handle, the region registry and the dispatcher. Commands
//! come in through [`Coordinator`]; engine callbacks come in through the
//! [`EngineListener`] the coordinator binds on [`Coordinator::start`].
//!
//! ```text
//! engine ──callback──▶ translator ──▶ registry (resolve, record state)
//!                                          │
//!                                          ▼
//!                                     dispatcher ──▶ live bus | deferred sink
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::engine::{EngineListener, RawBeacon, RawRegion, ScanEngine};
use crate::error::{BeaconError, Result};
use crate::region::{RegionKey, RegionState};
use crate::registry::{CallbackKind, Deregistration, MonitoredRegion, RegionRegistry, Registration};
use crate::scanner::{FilterSettings, ForegroundServiceConfig, ScanPeriods};
use crate::translator;
use crate::types::{BusEvent, DispatchEnvelope};

/// Callback side of the coordinator.
struct CoordinatorCore {
    registry: RegionRegistry,
    dispatcher: Dispatcher,
}

impl CoordinatorCore {
    /// Resolves a callback's region, falling back to the token itself for
    /// callbacks already in flight when their region was stopped.
    fn resolve(&self, raw: &RawRegion, kind: CallbackKind) -> Option<RegionKey> {
        let resolved = self.registry.resolve(raw, kind).or_else(|| raw.to_key());
        if resolved.is_none() {
            warn!(region = %raw.unique_id, "Dropping callback for unknown region");
        }
        resolved
    }

    fn deliver(&self, envelope: DispatchEnvelope) {
        match &envelope {
            DispatchEnvelope::StateDetermined { region, state } => {
                self.registry.record_state(&region.identifier, *state);
            }
            DispatchEnvelope::RegionEntered { region } => {
                self.registry.record_state(&region.identifier, RegionState::Inside);
            }
            DispatchEnvelope::RegionExited { region } => {
                self.registry.record_state(&region.identifier, RegionState::Outside);
            }
            DispatchEnvelope::BeaconsRanged(_) => {}
        }
        self.dispatcher.dispatch(envelope);
    }
}

impl EngineListener for CoordinatorCore {
    fn on_enter_region(&self, region: RawRegion) {
        debug!(region = %region.unique_id, "Engine: enter");
        if let Some(key) = self.resolve(&region, CallbackKind::Monitoring) {
            self.deliver(translator::translate_enter(key));
        }
    }

    fn on_exit_region(&self, region: RawRegion) {
        debug!(region = %region.unique_id, "Engine: exit");
        if let Some(key) = self.resolve(&region, CallbackKind::Monitoring) {
            self.deliver(translator::translate_exit(key));
        }
    }

    fn on_determine_state(&self, state: i32, region: RawRegion) {
        debug!(region = %region.unique_id, state, "Engine: state determined");
        if let Some(key) = self.resolve(&region, CallbackKind::Monitoring) {
            self.deliver(translator::translate_state_change(state, key));
        }
    }

    fn on_range_beacons(&self, beacons: Vec<RawBeacon>, region: RawRegion) {
        debug!(region = %region.unique_id, count = beacons.len(), "Engine: ranged");
        if let Some(key) = self.resolve(&region, CallbackKind::Ranging) {
            self.deliver(translator::translate_ranging(&beacons, key));
        }
    }
}

/// Command surface of the beacon coordinator.
pub struct Coordinator {
    engine: Arc<dyn ScanEngine>,
    core: Arc<CoordinatorCore>,
    started: AtomicBool,
}

impl Coordinator {
    /// Creates a coordinator driving `engine` and routing through `dispatcher`.
    #[must_use]
    pub fn new(engine: Arc<dyn ScanEngine>, dispatcher: Dispatcher) -> Self {
        Self {
            engine,
            core: Arc::new(CoordinatorCore {
                registry: RegionRegistry::new(),
                dispatcher,
            }),
            started: AtomicBool::new(false),
        }
    }

    /// Binds to the engine, starts deferred delivery and announces
    /// `beaconServiceConnected` on the live bus.
    ///
    /// Must be called inside a tokio runtime. Calling it twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::EngineUnavailable`] if the engine refuses the
    /// listener.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let listener: Arc<dyn EngineListener> = self.core.clone();
        if let Err(e) = self.engine.bind(listener) {
            self.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        self.core.dispatcher.start();
        self.core.dispatcher.announce(BusEvent::service_connected());
        info!(policy = ?self.core.dispatcher.policy(), "Beacon coordinator started");
        Ok(())
    }

    /// Stops every region, unbinds from the engine and drains deferred
    /// delivery.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let (monitored, ranged) = self.core.registry.clear();
        for key in &monitored {
            if let Err(e) = self.engine.stop_monitoring(key) {
                warn!(region = %key, error = %e, "Failed to stop monitoring during shutdown");
            }
        }
        for key in &ranged {
            if let Err(e) = self.engine.stop_ranging(key) {
                warn!(region = %key, error = %e, "Failed to stop ranging during shutdown");
            }
        }
        self.engine.unbind();
        self.core.dispatcher.shutdown().await;
        info!(
            monitored = monitored.len(),
            ranged = ranged.len(),
            "Beacon coordinator shut down"
        );
    }

    /// Returns `true` between [`start`](Self::start) and [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The dispatcher, for flushing and lifecycle inspection.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.core.dispatcher
    }

    /// The callback side, for engines that push events in-process.
    #[must_use]
    pub fn listener(&self) -> Arc<dyn EngineListener> {
        self.core.clone()
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    /// Starts monitoring a region.
    ///
    /// Empty `minor`/`major` mean "any".
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidIdentifier`] for a malformed key and an
    /// engine error if the engine refuses it. The registry is left as it was
    /// before the call then.
    pub fn start_monitoring(
        &self,
        identifier: &str,
        uuid: &str,
        minor: &str,
        major: &str,
    ) -> Result<Registration> {
        let key = RegionKey::parse(identifier, uuid, minor, major)?;
        let (outcome, displaced) = self.core.registry.start_monitoring(key.clone());
        if outcome == Registration::AlreadyActive {
            debug!(region = %key, "Monitoring already active");
            return Ok(outcome);
        }
        if let Err(e) = self.engine.start_monitoring(&key) {
            warn!(region = %key, ?outcome, error = %e, "Engine refused monitoring");
            self.core.registry.restore_monitoring(&key.identifier, displaced);
            return Err(e.into());
        }
        info!(region = %key, ?outcome, "Started monitoring");
        Ok(outcome)
    }

    /// Stops monitoring a region. Stopping an inactive region succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidIdentifier`] for a malformed key, or an
    /// engine error. The region stays registered on an engine error, so the
    /// stop can be retried.
    pub fn stop_monitoring(
        &self,
        identifier: &str,
        uuid: &str,
        minor: &str,
        major: &str,
    ) -> Result<Deregistration> {
        let key = RegionKey::parse(identifier, uuid, minor, major)?;
        let Some(removed) = self.core.registry.stop_monitoring(&key.identifier) else {
            debug!(region = %key, "Monitoring was not active");
            return Ok(Deregistration::NotActive);
        };
        if let Err(e) = self.engine.stop_monitoring(&removed.region) {
            warn!(region = %key, error = %e, "Engine refused to stop monitoring");
            self.core
                .registry
                .restore_monitoring(&key.identifier, Some(removed));
            return Err(e.into());
        }
        info!(region = %key, "Stopped monitoring");
        Ok(Deregistration::Removed)
    }

    /// Asks the engine to report the state of a region.
    ///
    /// The answer arrives later as a `didDetermineState` event.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidIdentifier`] for a malformed key, or an
    /// engine error.
    pub fn request_state_for_region(
        &self,
        identifier: &str,
        uuid: &str,
        minor: &str,
        major: &str,
    ) -> Result<()> {
        let key = RegionKey::parse(identifier, uuid, minor, major)?;
        self.engine.request_state(&key)?;
        debug!(region = %key, "Requested region state");
        Ok(())
    }

    /// Monitored regions with their last known state, sorted by identifier.
    #[must_use]
    pub fn monitored_regions(&self) -> Vec<MonitoredRegion> {
        self.core.registry.list_monitored()
    }

    // =========================================================================
    // Ranging
    // =========================================================================

    /// Starts ranging beacons in a region.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidIdentifier`] for a malformed key and an
    /// engine error if the engine refuses it. The registry is left as it was
    /// before the call then.
    pub fn start_ranging(
        &self,
        identifier: &str,
        uuid: &str,
        minor: &str,
        major: &str,
    ) -> Result<Registration> {
        let key = RegionKey::parse(identifier, uuid, minor, major)?;
        let (outcome, displaced) = self.core.registry.start_ranging(key.clone());
        if outcome == Registration::AlreadyActive {
            debug!(region = %key, "Ranging already active");
            return Ok(outcome);
        }
        if let Err(e) = self.engine.start_ranging(&key) {
            warn!(region = %key, ?outcome, error = %e, "Engine refused ranging");
            self.core.registry.restore_ranging(&key.identifier, displaced);
            return Err(e.into());
        }
        info!(region = %key, ?outcome, "Started ranging");
        Ok(outcome)
    }

    /// Stops ranging a region. Stopping an inactive region succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidIdentifier`] for a malformed key, or an
    /// engine error. The region stays registered on an engine error.
    pub fn stop_ranging(
        &self,
        identifier: &str,
        uuid: &str,
        minor: &str,
        major: &str,
    ) -> Result<Deregistration> {
        let key = RegionKey::parse(identifier, uuid, minor, major)?;
        let Some(removed) = self.core.registry.stop_ranging(&key.identifier) else {
            debug!(region = %key, "Ranging was not active");
            return Ok(Deregistration::NotActive);
        };
        if let Err(e) = self.engine.stop_ranging(&removed) {
            warn!(region = %key, error = %e, "Engine refused to stop ranging");
            self.core.registry.restore_ranging(&key.identifier, Some(removed));
            return Err(e.into());
        }
        info!(region = %key, "Stopped ranging");
        Ok(Deregistration::Removed)
    }

    /// Ranged regions, sorted by identifier.
    #[must_use]
    pub fn ranged_regions(&self) -> Vec<RegionKey> {
        self.core.registry.list_ranged()
    }

    // =========================================================================
    // Scanner settings
    // =========================================================================

    /// Selects the engine's RSSI smoothing filter.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the engine refuses the filter.
    pub fn set_rssi_filter(&self, settings: FilterSettings) -> Result<()> {
        self.engine.set_rssi_filter(settings)?;
        info!(filter = ?settings.kind, tuning = ?settings.tuning, "RSSI filter set");
        Ok(())
    }

    /// Sets the engine's scan cadence.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidScannerSetting`] for a zero scan window,
    /// or an engine error.
    pub fn set_scan_periods(&self, periods: ScanPeriods) -> Result<()> {
        periods.validate()?;
        self.engine.set_scan_periods(periods)?;
        info!(?periods, "Scan periods set");
        Ok(())
    }

    /// Runs scanning as a persistent foreground service.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidScannerSetting`] for an incomplete
    /// notification, or an engine error.
    pub fn enable_foreground_scanning(&self, config: ForegroundServiceConfig) -> Result<()> {
        config.validate()?;
        let channel = config.channel_id.clone();
        self.engine.set_foreground_service(Some(config))?;
        self.core.dispatcher.set_persistent_scanning(true);
        info!(channel = %channel, "Foreground scanning enabled");
        Ok(())
    }

    /// Stops the persistent foreground service.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the engine cannot toggle the service.
    pub fn disable_foreground_scanning(&self) -> Result<()> {
        self.engine.set_foreground_service(None)?;
        self.core.dispatcher.set_persistent_scanning(false);
        info!("Foreground scanning disabled");
        Ok(())
    }

    /// Adds an advertisement layout to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidScannerSetting`] for a malformed layout.
    pub fn add_beacon_layout(&self, layout: &str) -> Result<()> {
        if !crate::scanner::is_valid_beacon_layout(layout) {
            return Err(BeaconError::InvalidScannerSetting(format!(
                "beacon layout '{layout}' is not valid"
            )));
        }
        self.engine.add_beacon_layout(layout)?;
        info!(layout, "Beacon layout added");
        Ok(())
    }

    /// Removes an advertisement layout from the engine.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the engine fails to remove it.
    pub fn remove_beacon_layout(&self, layout: &str) -> Result<()> {
        self.engine.remove_beacon_layout(layout)?;
        info!(layout, "Beacon layout removed");
        Ok(())
    }

    /// Adds several advertisement layouts. Every layout is checked before
    /// any is handed to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidScannerSetting`] naming the first
    /// malformed layout, or an engine error.
    pub fn add_beacon_layouts(&self, layouts: &[String]) -> Result<()> {
        if let Some(bad) = layouts
            .iter()
            .find(|layout| !crate::scanner::is_valid_beacon_layout(layout))
        {
            return Err(BeaconError::InvalidScannerSetting(format!(
                "beacon layout '{bad}' is not valid"
            )));
        }
        self.engine.add_beacon_layouts(layouts)?;
        info!(count = layouts.len(), "Beacon layouts added");
        Ok(())
    }

    /// Removes several advertisement layouts.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the engine fails to remove one.
    pub fn remove_beacon_layouts(&self, layouts: &[String]) -> Result<()> {
        self.engine.remove_beacon_layouts(layouts)?;
        info!(count = layouts.len(), "Beacon layouts removed");
        Ok(())
    }

    /// Makes the engine tell apart beacons that share identifiers but not a
    /// hardware address.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the engine cannot change the setting.
    pub fn set_hardware_equality_enforced(&self, enforced: bool) -> Result<()> {
        self.engine.set_hardware_equality_enforced(enforced)?;
        info!(enforced, "Hardware equality enforcement set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{
        DeferredSink, DeliveryPolicy, EventBus, LifecycleFlag, RetryPolicy, SubmitError,
    };
    use crate::engine::{EngineError, EngineResult, PassiveEngine, STATE_INSIDE};
    use crate::scanner::IBEACON_LAYOUT;
    use crate::types::{BusPayload, DeferredRecord, EventTag};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    const UUID: &str = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0";
    const OTHER_UUID: &str = "B9407F30-F5F8-466E-AFF9-25556B57FE6D";

    /// Passive engine that refuses region starts or stops on demand.
    #[derive(Default)]
    struct RefusingEngine {
        inner: PassiveEngine,
        refuse_start: AtomicBool,
        refuse_stop: AtomicBool,
    }

    impl RefusingEngine {
        fn gate(flag: &AtomicBool) -> EngineResult<()> {
            if flag.load(Ordering::SeqCst) {
                return Err(EngineError::Rejected {
                    message: "radio busy".into(),
                });
            }
            Ok(())
        }
    }

    impl ScanEngine for RefusingEngine {
        fn bind(&self, listener: Arc<dyn EngineListener>) -> EngineResult<()> {
            self.inner.bind(listener)
        }
        fn unbind(&self) {
            self.inner.unbind();
        }
        fn start_monitoring(&self, region: &RegionKey) -> EngineResult<()> {
            Self::gate(&self.refuse_start)?;
            self.inner.start_monitoring(region)
        }
        fn stop_monitoring(&self, region: &RegionKey) -> EngineResult<()> {
            Self::gate(&self.refuse_stop)?;
            self.inner.stop_monitoring(region)
        }
        fn start_ranging(&self, region: &RegionKey) -> EngineResult<()> {
            Self::gate(&self.refuse_start)?;
            self.inner.start_ranging(region)
        }
        fn stop_ranging(&self, region: &RegionKey) -> EngineResult<()> {
            Self::gate(&self.refuse_stop)?;
            self.inner.stop_ranging(region)
        }
        fn request_state(&self, region: &RegionKey) -> EngineResult<()> {
            self.inner.request_state(region)
        }
        fn set_rssi_filter(&self, settings: FilterSettings) -> EngineResult<()> {
            self.inner.set_rssi_filter(settings)
        }
        fn set_scan_periods(&self, periods: ScanPeriods) -> EngineResult<()> {
            self.inner.set_scan_periods(periods)
        }
        fn set_foreground_service(
            &self,
            config: Option<ForegroundServiceConfig>,
        ) -> EngineResult<()> {
            self.inner.set_foreground_service(config)
        }
        fn add_beacon_layout(&self, layout: &str) -> EngineResult<()> {
            self.inner.add_beacon_layout(layout)
        }
        fn remove_beacon_layout(&self, layout: &str) -> EngineResult<()> {
            self.inner.remove_beacon_layout(layout)
        }
        fn set_hardware_equality_enforced(&self, enforced: bool) -> EngineResult<()> {
            self.inner.set_hardware_equality_enforced(enforced)
        }
    }

    fn refusing_coordinator(engine: Arc<RefusingEngine>) -> Coordinator {
        let dispatcher = Dispatcher::new(
            DeliveryPolicy::LiveOrDeferred,
            Arc::new(LifecycleFlag::new(false)),
            Arc::new(RecordingBus::default()),
            Arc::new(RecordingSink::default()),
        );
        let coordinator = Coordinator::new(engine, dispatcher);
        coordinator.start().unwrap();
        coordinator
    }

    #[derive(Default)]
    struct RecordingBus {
        events: Mutex<Vec<BusEvent>>,
    }

    impl EventBus for RecordingBus {
        fn emit(&self, event: BusEvent) {
            self.events.lock().push(event);
        }
    }

    impl RecordingBus {
        fn names(&self) -> Vec<String> {
            self.events
                .lock()
                .iter()
                .map(|e| e.event.clone())
                .filter(|name| name != BusEvent::SERVICE_CONNECTED)
                .collect()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        accepted: Mutex<Vec<DeferredRecord>>,
        transient_failures: AtomicU32,
    }

    #[async_trait]
    impl DeferredSink for RecordingSink {
        async fn submit(&self, record: &DeferredRecord) -> std::result::Result<(), SubmitError> {
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SubmitError::Transient("spool busy".into()));
            }
            self.accepted.lock().push(record.clone());
            Ok(())
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                max_attempts: None,
            }
        }
    }

    struct Harness {
        coordinator: Coordinator,
        engine: Arc<PassiveEngine>,
        lifecycle: Arc<LifecycleFlag>,
        bus: Arc<RecordingBus>,
        sink: Arc<RecordingSink>,
    }

    fn harness(sink: RecordingSink) -> Harness {
        let engine = Arc::new(PassiveEngine::default());
        let lifecycle = Arc::new(LifecycleFlag::new(false));
        let bus = Arc::new(RecordingBus::default());
        let sink = Arc::new(sink);
        let dispatcher = Dispatcher::new(
            DeliveryPolicy::LiveOrDeferred,
            lifecycle.clone(),
            bus.clone(),
            sink.clone(),
        );
        let coordinator = Coordinator::new(engine.clone(), dispatcher);
        coordinator.start().unwrap();
        Harness {
            coordinator,
            engine,
            lifecycle,
            bus,
            sink,
        }
    }

    fn raw(identifier: &str) -> RawRegion {
        RawRegion::from_key(&RegionKey::parse(identifier, UUID, "", "").unwrap())
    }

    #[tokio::test]
    async fn test_start_announces_service_connected() {
        let h = harness(RecordingSink::default());
        assert_eq!(h.bus.events.lock()[0].event, BusEvent::SERVICE_CONNECTED);
        assert!(h.coordinator.is_started());
    }

    #[tokio::test]
    async fn test_r1_determine_state_payload() {
        let h = harness(RecordingSink::default());
        h.coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        h.engine.emit_state(STATE_INSIDE, raw("r1")).unwrap();

        let events = h.bus.events.lock();
        let event = events.last().unwrap();
        assert_eq!(event.event, "didDetermineState");
        assert_eq!(
            serde_json::to_value(&event.payload).unwrap(),
            serde_json::json!({
                "identifier": "r1",
                "uuid": UUID,
                "major": 0,
                "minor": 0,
                "state": "inside"
            })
        );
        drop(events);

        let monitored = h.coordinator.monitored_regions();
        assert_eq!(monitored[0].state, RegionState::Inside);
        assert_eq!(monitored[0].region.major, None);
    }

    #[tokio::test]
    async fn test_live_sequence_keeps_engine_order() {
        let h = harness(RecordingSink::default());
        h.coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        h.engine.emit_enter(raw("r1")).unwrap();
        h.engine.emit_state(STATE_INSIDE, raw("r1")).unwrap();
        h.engine.emit_exit(raw("r1")).unwrap();

        assert_eq!(
            h.bus.names(),
            ["regionDidEnter", "didDetermineState", "regionDidExit"]
        );
        assert_eq!(
            h.coordinator.monitored_regions()[0].state,
            RegionState::Outside
        );
    }

    #[tokio::test]
    async fn test_suspended_enter_submitted_once() {
        let h = harness(RecordingSink::default());
        h.coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        h.lifecycle.set_suspended(true);
        h.engine.emit_enter(raw("r1")).unwrap();
        h.coordinator.dispatcher().flush().await;

        assert!(h.bus.names().is_empty());
        let accepted = h.sink.accepted.lock();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].event, EventTag::Enter);
        assert_eq!(accepted[0].identifier, "r1");
    }

    #[tokio::test]
    async fn test_region_order_survives_lifecycle_flip() {
        let h = harness(RecordingSink {
            transient_failures: AtomicU32::new(2),
            ..RecordingSink::default()
        });
        h.coordinator.start_monitoring("r1", UUID, "", "").unwrap();

        h.lifecycle.set_suspended(true);
        h.engine.emit_enter(raw("r1")).unwrap();
        h.lifecycle.set_suspended(false);
        h.engine.emit_exit(raw("r1")).unwrap();
        h.coordinator.dispatcher().flush().await;

        let order: Vec<EventTag> = h.sink.accepted.lock().iter().map(|r| r.event).collect();
        assert_eq!(order, [EventTag::Enter, EventTag::Exit]);
        assert!(h.bus.names().is_empty());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_tolerant() {
        let h = harness(RecordingSink::default());
        assert_eq!(
            h.coordinator.start_monitoring("r1", UUID, "", "").unwrap(),
            Registration::Added
        );
        assert_eq!(
            h.coordinator.start_monitoring("r1", UUID, "", "").unwrap(),
            Registration::AlreadyActive
        );
        assert_eq!(h.coordinator.monitored_regions().len(), 1);

        assert_eq!(
            h.coordinator.stop_monitoring("ghost", UUID, "", "").unwrap(),
            Deregistration::NotActive
        );
        assert_eq!(
            h.coordinator.stop_ranging("ghost", UUID, "", "").unwrap(),
            Deregistration::NotActive
        );
    }

    #[tokio::test]
    async fn test_invalid_key_touches_nothing() {
        let h = harness(RecordingSink::default());
        let err = h
            .coordinator
            .start_monitoring("r1", "not-a-uuid", "", "")
            .unwrap_err();
        assert!(err.is_invalid_identifier());
        let err = h.coordinator.start_ranging("r1", UUID, "70000", "").unwrap_err();
        assert!(err.is_invalid_identifier());

        assert!(h.coordinator.monitored_regions().is_empty());
        assert!(h.coordinator.ranged_regions().is_empty());
        assert!(h.engine.snapshot().monitoring.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_callback_after_stop_is_dispatched() {
        let h = harness(RecordingSink::default());
        h.coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        h.coordinator.stop_monitoring("r1", UUID, "", "").unwrap();

        h.coordinator.listener().on_exit_region(raw("r1"));
        assert_eq!(h.bus.names(), ["regionDidExit"]);
        assert!(h.coordinator.monitored_regions().is_empty());
    }

    #[tokio::test]
    async fn test_ranging_with_nan_distance() {
        let h = harness(RecordingSink::default());
        h.coordinator.start_ranging("r2", UUID, "", "").unwrap();
        let beacons = vec![RawBeacon {
            identifiers: vec![UUID.to_lowercase(), "1".into(), "2".into()],
            rssi: -71,
            distance: f64::NAN,
        }];
        h.engine.emit_ranging(beacons, raw("r2")).unwrap();

        let events = h.bus.events.lock();
        match &events.last().unwrap().payload {
            BusPayload::Ranging(payload) => {
                assert_eq!(payload.region.identifier, "r2");
                assert_eq!(payload.beacons[0].distance, 999.0);
                assert_eq!(payload.beacons[0].major, Some(1));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_foreground_scanning_sets_hint() {
        let h = harness(RecordingSink::default());
        let config = ForegroundServiceConfig {
            channel_id: "beacons".into(),
            channel_name: "Beacons".into(),
            icon_name: "ic_beacon".into(),
            title: "Scanning".into(),
            activity_name: "MainActivity".into(),
        };
        h.coordinator.enable_foreground_scanning(config.clone()).unwrap();
        assert!(h.coordinator.dispatcher().persistent_scanning());
        assert_eq!(h.engine.snapshot().foreground_service, Some(config));

        h.coordinator.disable_foreground_scanning().unwrap();
        assert!(!h.coordinator.dispatcher().persistent_scanning());
        assert_eq!(h.engine.snapshot().foreground_service, None);
    }

    #[tokio::test]
    async fn test_scanner_settings_pass_through() {
        let h = harness(RecordingSink::default());
        let filter = FilterSettings::new(crate::scanner::RssiFilter::Arma, 0.1);
        h.coordinator.set_rssi_filter(filter).unwrap();
        assert!(h.coordinator.add_beacon_layout("nonsense").is_err());
        h.coordinator
            .add_beacon_layout(crate::scanner::IBEACON_LAYOUT)
            .unwrap();

        let snapshot = h.engine.snapshot();
        assert_eq!(snapshot.rssi_filter, Some(filter));
        assert_eq!(snapshot.beacon_layouts, [crate::scanner::IBEACON_LAYOUT]);

        let bad = ScanPeriods {
            background_scan_ms: 0,
            ..ScanPeriods::default()
        };
        assert!(h.coordinator.set_scan_periods(bad).is_err());
        assert!(h.engine.snapshot().scan_periods.is_none());
    }

    #[tokio::test]
    async fn test_refused_replacement_keeps_previous_registration() {
        let engine = Arc::new(RefusingEngine::default());
        let coordinator = refusing_coordinator(engine.clone());
        coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        coordinator.listener().on_enter_region(raw("r1"));
        coordinator.start_ranging("r2", UUID, "", "7").unwrap();

        engine.refuse_start.store(true, Ordering::SeqCst);
        let err = coordinator.start_monitoring("r1", UUID, "", "5").unwrap_err();
        assert!(err.is_engine_error());
        assert!(coordinator.start_ranging("r2", UUID, "", "8").is_err());
        assert!(coordinator.start_monitoring("r3", UUID, "", "").is_err());

        let monitored = coordinator.monitored_regions();
        assert_eq!(monitored.len(), 1);
        assert_eq!(monitored[0].region.major, None);
        assert_eq!(monitored[0].state, RegionState::Inside);
        assert_eq!(coordinator.ranged_regions()[0].major, Some(7));
        assert_eq!(
            engine.inner.snapshot().monitoring.into_iter().collect::<Vec<_>>(),
            ["r1"]
        );
    }

    #[tokio::test]
    async fn test_refused_stop_can_be_retried() {
        let engine = Arc::new(RefusingEngine::default());
        let coordinator = refusing_coordinator(engine.clone());
        coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        coordinator.start_ranging("r1", UUID, "", "").unwrap();

        engine.refuse_stop.store(true, Ordering::SeqCst);
        assert!(coordinator.stop_monitoring("r1", UUID, "", "").is_err());
        assert!(coordinator.stop_ranging("r1", UUID, "", "").is_err());
        assert_eq!(coordinator.monitored_regions().len(), 1);
        assert_eq!(coordinator.ranged_regions().len(), 1);

        engine.refuse_stop.store(false, Ordering::SeqCst);
        assert_eq!(
            coordinator.stop_monitoring("r1", UUID, "", "").unwrap(),
            Deregistration::Removed
        );
        assert_eq!(
            coordinator.stop_ranging("r1", UUID, "", "").unwrap(),
            Deregistration::Removed
        );
        let snapshot = engine.inner.snapshot();
        assert!(snapshot.monitoring.is_empty());
        assert!(snapshot.ranging.is_empty());
    }

    #[tokio::test]
    async fn test_ranging_callback_carries_ranged_key() {
        let h = harness(RecordingSink::default());
        h.coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        h.coordinator.start_ranging("r1", OTHER_UUID, "", "").unwrap();

        h.engine.emit_ranging(Vec::new(), raw("r1")).unwrap();
        h.engine.emit_enter(raw("r1")).unwrap();

        let events = h.bus.events.lock();
        let uuids: Vec<&str> = events
            .iter()
            .filter_map(|event| match &event.payload {
                BusPayload::Ranging(payload) => Some(payload.region.uuid.as_str()),
                BusPayload::Monitoring(payload) => Some(payload.uuid.as_str()),
                BusPayload::Empty(_) => None,
            })
            .collect();
        assert_eq!(uuids, [OTHER_UUID, UUID]);
    }

    #[tokio::test]
    async fn test_layout_batch_and_hardware_equality() {
        let h = harness(RecordingSink::default());
        let eddystone = "s:0-1=feaa,m:2-2=00,p:3-3,i:4-13,i:14-19".to_string();

        let err = h
            .coordinator
            .add_beacon_layouts(&[eddystone.clone(), "nonsense".into()])
            .unwrap_err();
        assert!(matches!(err, BeaconError::InvalidScannerSetting(_)));
        assert!(h.engine.snapshot().beacon_layouts.is_empty());

        let batch = [IBEACON_LAYOUT.to_string(), eddystone.clone()];
        h.coordinator.add_beacon_layouts(&batch).unwrap();
        assert_eq!(h.engine.snapshot().beacon_layouts, batch);
        h.coordinator
            .remove_beacon_layouts(&[IBEACON_LAYOUT.to_string()])
            .unwrap();
        assert_eq!(h.engine.snapshot().beacon_layouts, [eddystone]);

        h.coordinator.set_hardware_equality_enforced(true).unwrap();
        assert!(h.engine.snapshot().hardware_equality_enforced);
    }

    #[tokio::test]
    async fn test_shutdown_returns_when_sink_never_accepts() {
        let engine = Arc::new(PassiveEngine::default());
        let sink = Arc::new(AbandonCounter::default());
        let dispatcher = Dispatcher::new(
            DeliveryPolicy::DeferredOnly,
            Arc::new(LifecycleFlag::new(false)),
            Arc::new(RecordingBus::default()),
            sink.clone(),
        )
        .with_drain_timeout(Duration::from_millis(50));
        let coordinator = Coordinator::new(engine, dispatcher);
        coordinator.start().unwrap();
        coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        coordinator.listener().on_enter_region(raw("r1"));

        tokio::time::timeout(Duration::from_secs(2), coordinator.shutdown())
            .await
            .expect("shutdown should not wait on a sink that never accepts");
        assert_eq!(sink.abandoned.load(Ordering::SeqCst), 1);
    }

    /// Always busy; counts what gets abandoned.
    #[derive(Default)]
    struct AbandonCounter {
        abandoned: AtomicU32,
    }

    #[async_trait]
    impl DeferredSink for AbandonCounter {
        async fn submit(&self, _record: &DeferredRecord) -> std::result::Result<(), SubmitError> {
            Err(SubmitError::Transient("spool offline".into()))
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                max_attempts: None,
            }
        }

        fn on_abandoned(&self, _record: &DeferredRecord, _error: &BeaconError) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_callbacks_route_each_envelope_once() {
        const CYCLES: i32 = 200;
        let h = harness(RecordingSink::default());
        h.coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        h.coordinator.start_ranging("r1", UUID, "", "").unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let toggler = scope.spawn(|| {
                let mut suspended = false;
                while !done.load(Ordering::SeqCst) {
                    suspended = !suspended;
                    h.lifecycle.set_suspended(suspended);
                    std::thread::yield_now();
                }
            });
            let monitoring = scope.spawn(|| {
                for _ in 0..CYCLES {
                    h.engine.emit_enter(raw("r1")).unwrap();
                    h.engine.emit_state(STATE_INSIDE, raw("r1")).unwrap();
                    h.engine.emit_exit(raw("r1")).unwrap();
                }
            });
            let ranging = scope.spawn(|| {
                for sequence in 0..CYCLES {
                    let beacon = RawBeacon {
                        identifiers: vec![UUID.to_lowercase(), "1".into(), "2".into()],
                        rssi: sequence,
                        distance: 1.5,
                    };
                    h.engine.emit_ranging(vec![beacon], raw("r1")).unwrap();
                }
            });
            monitoring.join().unwrap();
            ranging.join().unwrap();
            done.store(true, Ordering::SeqCst);
            toggler.join().unwrap();
        });

        assert!(h.coordinator.dispatcher().flush().await);
        assert_eq!(h.coordinator.dispatcher().pending_deferrals(), 0);

        let mut counts: HashMap<String, i32> = HashMap::new();
        let mut sequences = Vec::new();
        let mut tally = |event: &BusEvent| {
            if let BusPayload::Ranging(payload) = &event.payload {
                sequences.extend(payload.beacons.iter().map(|b| b.rssi));
            }
            *counts.entry(event.event.clone()).or_default() += 1;
        };
        h.bus
            .events
            .lock()
            .iter()
            .filter(|event| event.event != BusEvent::SERVICE_CONNECTED)
            .for_each(&mut tally);
        let accepted = h.sink.accepted.lock();
        for record in accepted.iter() {
            tally(&record.clone().into_bus_event());
        }

        for name in [
            "regionDidEnter",
            "didDetermineState",
            "regionDidExit",
            "beaconsDidRange",
        ] {
            assert_eq!(counts.get(name).copied(), Some(CYCLES), "{name}");
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (0..CYCLES).collect::<Vec<_>>());

        let ids: HashSet<_> = accepted.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), accepted.len());
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let h = harness(RecordingSink::default());
        h.coordinator.start_monitoring("r1", UUID, "", "").unwrap();
        h.coordinator.start_ranging("r2", UUID, "", "").unwrap();
        h.coordinator.shutdown().await;

        assert!(!h.coordinator.is_started());
        assert!(h.coordinator.monitored_regions().is_empty());
        assert!(h.coordinator.ranged_regions().is_empty());
        assert!(h.engine.emit_enter(raw("r1")).is_err());
    }
}
