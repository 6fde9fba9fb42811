//! Interface to the beacon-scanning engine.
//!
//! The engine performs the actual radio work: parsing advertisements,
//! sampling RSSI, estimating distance. This crate never reimplements it. It
//! only defines:
//!
//! - the raw shapes the engine reports ([`RawRegion`], [`RawBeacon`]),
//! - the callback surface the engine drives ([`EngineListener`]),
//! - the command handle the coordinator owns ([`ScanEngine`]).
//!
//! [`PassiveEngine`] is a [`ScanEngine`] for engines that run out of process:
//! it records the commands it receives and forwards pushed callbacks to the
//! bound listener.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::region::RegionKey;
use crate::scanner::{FilterSettings, ForegroundServiceConfig, ScanPeriods};

/// Engine state code for "inside".
pub const STATE_INSIDE: i32 = 1;

/// Engine state code for "outside".
pub const STATE_OUTSIDE: i32 = 0;

/// Errors reported by a [`ScanEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// No listener has been bound yet.
    #[error("engine has no bound listener")]
    NotBound,

    /// The engine was torn down.
    #[error("engine has been shut down")]
    ShutDown,

    /// The engine refused the command.
    #[error("engine rejected the command: {message}")]
    Rejected {
        /// Reason given by the engine.
        message: String,
    },

    /// A beacon layout expression was malformed.
    #[error("invalid beacon layout: {layout}")]
    InvalidLayout {
        /// The rejected layout.
        layout: String,
    },
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Region token as reported by the engine in a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "unique_id": "r1",
    "uuid": "e2c56db5-dffb-48d2-b060-d0f5a71096e0",
    "major": null,
    "minor": null
}))]
pub struct RawRegion {
    /// Identifier the region was registered under.
    pub unique_id: String,
    /// First identifier, if the engine still knows it.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Second identifier.
    #[serde(default)]
    pub major: Option<u16>,
    /// Third identifier.
    #[serde(default)]
    pub minor: Option<u16>,
}

impl RawRegion {
    /// Builds the token the engine would report for `key`.
    #[must_use]
    pub fn from_key(key: &RegionKey) -> Self {
        Self {
            unique_id: key.identifier.clone(),
            uuid: Some(key.uuid_string()),
            major: key.major,
            minor: key.minor,
        }
    }

    /// Reconstructs a key from the token alone.
    ///
    /// Used when the registry no longer knows the identifier, e.g. for a
    /// callback that was already in flight when the region was stopped.
    #[must_use]
    pub fn to_key(&self) -> Option<RegionKey> {
        let uuid = crate::region::parse_uuid(self.uuid.as_deref()?).ok()?;
        RegionKey::new(self.unique_id.clone(), uuid, self.major, self.minor).ok()
    }
}

/// A beacon as reported by a ranging callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifiers": ["e2c56db5-dffb-48d2-b060-d0f5a71096e0", "1", "4"],
    "rssi": -67,
    "distance": 1.82
}))]
pub struct RawBeacon {
    /// Identifier slots in advertisement order.
    pub identifiers: Vec<String>,
    /// Raw signal strength.
    pub rssi: i32,
    /// Engine distance estimate. May be non-finite.
    #[serde(default = "unknown_distance", with = "lenient_f64")]
    #[schema(value_type = Option<f64>)]
    pub distance: f64,
}

const fn unknown_distance() -> f64 {
    f64::NAN
}

/// JSON has no NaN or infinity; `null` and the strings `"NaN"`, `"Infinity"`,
/// `"-Infinity"` stand in for them.
mod lenient_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { "Infinity" } else { "-Infinity" })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Repr>::deserialize(deserializer)? {
            Some(Repr::Number(n)) => Ok(n),
            Some(Repr::Text(s)) => match s.as_str() {
                "Infinity" | "inf" => Ok(f64::INFINITY),
                "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
                "NaN" | "nan" => Ok(f64::NAN),
                other => other.parse().map_err(serde::de::Error::custom),
            },
            None => Ok(f64::NAN),
        }
    }
}

/// Callbacks the scanning engine drives.
///
/// Invoked from the engine's own threads, possibly concurrently for
/// monitoring and ranging. Implementations must not block and have no error
/// channel back to the engine.
pub trait EngineListener: Send + Sync {
    /// The device entered `region`.
    fn on_enter_region(&self, region: RawRegion);

    /// The device left `region`.
    fn on_exit_region(&self, region: RawRegion);

    /// The engine determined the state of `region`.
    fn on_determine_state(&self, state: i32, region: RawRegion);

    /// A ranging cycle for `region` completed.
    fn on_range_beacons(&self, beacons: Vec<RawBeacon>, region: RawRegion);
}

/// Command handle to the scanning engine.
///
/// Owned by the coordinator for its whole lifetime.
pub trait ScanEngine: Send + Sync {
    /// Routes engine callbacks to `listener` from now on.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot accept a listener.
    fn bind(&self, listener: Arc<dyn EngineListener>) -> EngineResult<()>;

    /// Stops routing callbacks.
    fn unbind(&self);

    /// Starts region monitoring.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses the region.
    fn start_monitoring(&self, region: &RegionKey) -> EngineResult<()>;

    /// Stops region monitoring.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to stop.
    fn stop_monitoring(&self, region: &RegionKey) -> EngineResult<()>;

    /// Starts ranging beacons in a region.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses the region.
    fn start_ranging(&self, region: &RegionKey) -> EngineResult<()>;

    /// Stops ranging beacons in a region.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to stop.
    fn stop_ranging(&self, region: &RegionKey) -> EngineResult<()>;

    /// Asks the engine to report the current state of a region.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot service the request.
    fn request_state(&self, region: &RegionKey) -> EngineResult<()>;

    /// Selects the RSSI smoothing filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses the filter.
    fn set_rssi_filter(&self, settings: FilterSettings) -> EngineResult<()>;

    /// Sets scan and between-scan periods.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses the periods.
    fn set_scan_periods(&self, periods: ScanPeriods) -> EngineResult<()>;

    /// Enables or disables the persistent foreground scanning service.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot toggle the service.
    fn set_foreground_service(&self, config: Option<ForegroundServiceConfig>) -> EngineResult<()>;

    /// Adds an advertisement layout to the engine's parsers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidLayout`] if the layout is malformed.
    fn add_beacon_layout(&self, layout: &str) -> EngineResult<()>;

    /// Removes an advertisement layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to remove it.
    fn remove_beacon_layout(&self, layout: &str) -> EngineResult<()>;

    /// Adds several layouts at once.
    ///
    /// # Errors
    ///
    /// Returns the first layout error. Engines that can check every layout
    /// up front should do so and add none on failure.
    fn add_beacon_layouts(&self, layouts: &[String]) -> EngineResult<()> {
        layouts.iter().try_for_each(|layout| self.add_beacon_layout(layout))
    }

    /// Removes several layouts at once.
    ///
    /// # Errors
    ///
    /// Returns the first removal error.
    fn remove_beacon_layouts(&self, layouts: &[String]) -> EngineResult<()> {
        layouts
            .iter()
            .try_for_each(|layout| self.remove_beacon_layout(layout))
    }

    /// Makes beacon identity include the hardware address, so two
    /// transmitters with the same identifiers are reported separately.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot change the setting.
    fn set_hardware_equality_enforced(&self, enforced: bool) -> EngineResult<()>;
}

/// What a [`PassiveEngine`] has been told to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct EngineSnapshot {
    /// Identifiers currently monitored.
    #[schema(value_type = Vec<String>)]
    pub monitoring: BTreeSet<String>,
    /// Identifiers currently ranged.
    #[schema(value_type = Vec<String>)]
    pub ranging: BTreeSet<String>,
    /// Identifiers with a pending state request.
    pub state_requests: Vec<String>,
    /// Active RSSI filter.
    pub rssi_filter: Option<FilterSettings>,
    /// Active scan periods.
    pub scan_periods: Option<ScanPeriods>,
    /// Foreground service configuration while enabled.
    pub foreground_service: Option<ForegroundServiceConfig>,
    /// Registered advertisement layouts.
    pub beacon_layouts: Vec<String>,
    /// Whether beacon identity includes the hardware address.
    pub hardware_equality_enforced: bool,
}

#[derive(Default)]
struct PassiveInner {
    listener: Option<Arc<dyn EngineListener>>,
    shut_down: bool,
    snapshot: EngineSnapshot,
}

/// A [`ScanEngine`] whose radio work happens elsewhere.
///
/// Commands are recorded so the external scanner can read what to scan for;
/// callbacks pushed through the `emit_*` methods reach the bound listener.
#[derive(Default)]
pub struct PassiveEngine {
    inner: RwLock<PassiveInner>,
}

impl PassiveEngine {
    /// Creates an engine with the given initial beacon layouts.
    #[must_use]
    pub fn new(layouts: impl IntoIterator<Item = String>) -> Self {
        let engine = Self::default();
        engine.inner.write().snapshot.beacon_layouts = layouts.into_iter().collect();
        engine
    }

    /// Returns a copy of everything the engine has been told.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.read().snapshot.clone()
    }

    fn listener(&self) -> EngineResult<Arc<dyn EngineListener>> {
        let inner = self.inner.read();
        if inner.shut_down {
            return Err(EngineError::ShutDown);
        }
        inner.listener.clone().ok_or(EngineError::NotBound)
    }

    /// Pushes an enter callback.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotBound`] if no listener is bound.
    pub fn emit_enter(&self, region: RawRegion) -> EngineResult<()> {
        self.listener()?.on_enter_region(region);
        Ok(())
    }

    /// Pushes an exit callback.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotBound`] if no listener is bound.
    pub fn emit_exit(&self, region: RawRegion) -> EngineResult<()> {
        self.listener()?.on_exit_region(region);
        Ok(())
    }

    /// Pushes a state determination callback.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotBound`] if no listener is bound.
    pub fn emit_state(&self, state: i32, region: RawRegion) -> EngineResult<()> {
        let listener = self.listener()?;
        self.inner
            .write()
            .snapshot
            .state_requests
            .retain(|id| id != &region.unique_id);
        listener.on_determine_state(state, region);
        Ok(())
    }

    /// Pushes a ranging callback.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotBound`] if no listener is bound.
    pub fn emit_ranging(&self, beacons: Vec<RawBeacon>, region: RawRegion) -> EngineResult<()> {
        self.listener()?.on_range_beacons(beacons, region);
        Ok(())
    }

    fn with_snapshot<F>(&self, f: F) -> EngineResult<()>
    where
        F: FnOnce(&mut EngineSnapshot),
    {
        let mut inner = self.inner.write();
        if inner.shut_down {
            return Err(EngineError::ShutDown);
        }
        f(&mut inner.snapshot);
        Ok(())
    }
}

impl ScanEngine for PassiveEngine {
    fn bind(&self, listener: Arc<dyn EngineListener>) -> EngineResult<()> {
        let mut inner = self.inner.write();
        inner.shut_down = false;
        inner.listener = Some(listener);
        debug!("Passive engine bound to listener");
        Ok(())
    }

    fn unbind(&self) {
        let mut inner = self.inner.write();
        inner.listener = None;
        inner.shut_down = true;
        debug!("Passive engine unbound");
    }

    fn start_monitoring(&self, region: &RegionKey) -> EngineResult<()> {
        self.with_snapshot(|s| {
            s.monitoring.insert(region.identifier.clone());
        })
    }

    fn stop_monitoring(&self, region: &RegionKey) -> EngineResult<()> {
        self.with_snapshot(|s| {
            s.monitoring.remove(&region.identifier);
            s.state_requests.retain(|id| id != &region.identifier);
        })
    }

    fn start_ranging(&self, region: &RegionKey) -> EngineResult<()> {
        self.with_snapshot(|s| {
            s.ranging.insert(region.identifier.clone());
        })
    }

    fn stop_ranging(&self, region: &RegionKey) -> EngineResult<()> {
        self.with_snapshot(|s| {
            s.ranging.remove(&region.identifier);
        })
    }

    fn request_state(&self, region: &RegionKey) -> EngineResult<()> {
        self.with_snapshot(|s| {
            if !s.state_requests.contains(&region.identifier) {
                s.state_requests.push(region.identifier.clone());
            }
        })
    }

    fn set_rssi_filter(&self, settings: FilterSettings) -> EngineResult<()> {
        self.with_snapshot(|s| s.rssi_filter = Some(settings))
    }

    fn set_scan_periods(&self, periods: ScanPeriods) -> EngineResult<()> {
        self.with_snapshot(|s| s.scan_periods = Some(periods))
    }

    fn set_foreground_service(&self, config: Option<ForegroundServiceConfig>) -> EngineResult<()> {
        self.with_snapshot(|s| s.foreground_service = config)
    }

    fn add_beacon_layout(&self, layout: &str) -> EngineResult<()> {
        if !crate::scanner::is_valid_beacon_layout(layout) {
            warn!(layout, "Rejected malformed beacon layout");
            return Err(EngineError::InvalidLayout {
                layout: layout.to_string(),
            });
        }
        self.with_snapshot(|s| {
            if !s.beacon_layouts.iter().any(|l| l == layout) {
                s.beacon_layouts.push(layout.to_string());
            }
        })
    }

    fn remove_beacon_layout(&self, layout: &str) -> EngineResult<()> {
        self.with_snapshot(|s| s.beacon_layouts.retain(|l| l != layout))
    }

    fn add_beacon_layouts(&self, layouts: &[String]) -> EngineResult<()> {
        if let Some(bad) = layouts
            .iter()
            .find(|layout| !crate::scanner::is_valid_beacon_layout(layout))
        {
            warn!(layout = %bad, "Rejected layout batch with a malformed entry");
            return Err(EngineError::InvalidLayout {
                layout: bad.clone(),
            });
        }
        self.with_snapshot(|s| {
            for layout in layouts {
                if !s.beacon_layouts.contains(layout) {
                    s.beacon_layouts.push(layout.clone());
                }
            }
        })
    }

    fn set_hardware_equality_enforced(&self, enforced: bool) -> EngineResult<()> {
        self.with_snapshot(|s| s.hardware_equality_enforced = enforced)
    }
}
