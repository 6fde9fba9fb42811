//! Active monitored and ranged regions.
//!
//! Start is idempotent and stop is tolerant, so command surfaces can retry
//! freely. All operations are serialized under one mutex.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::engine::RawRegion;
use crate::region::{RegionKey, RegionState};

/// Outcome of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    /// The identifier was not active before.
    Added,
    /// The identifier was already active with the same filter.
    AlreadyActive,
    /// The identifier was active with a different filter and has been replaced.
    Replaced,
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Deregistration {
    /// The identifier was active and has been removed.
    Removed,
    /// The identifier was not active; nothing changed.
    NotActive,
}

/// Which kind of engine callback a region token arrived with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Enter, exit or state determination.
    Monitoring,
    /// A ranging cycle.
    Ranging,
}

/// A monitored region with its last known state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MonitoredRegion {
    /// Region key.
    pub region: RegionKey,
    /// Last state recorded for the region.
    pub state: RegionState,
}

#[derive(Default)]
struct Tables {
    monitored: HashMap<String, MonitoredRegion>,
    ranged: HashMap<String, RegionKey>,
}

/// Set of regions the coordinator has asked the engine to watch.
#[derive(Default)]
pub struct RegionRegistry {
    tables: Mutex<Tables>,
}

impl RegionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` for monitoring.
    ///
    /// Re-registering with a different filter replaces the entry and resets
    /// its state to [`RegionState::Unknown`]. The displaced entry is returned
    /// so a failed engine command can put it back with
    /// [`restore_monitoring`](Self::restore_monitoring).
    pub fn start_monitoring(&self, key: RegionKey) -> (Registration, Option<MonitoredRegion>) {
        let mut tables = self.tables.lock();
        let outcome = match tables.monitored.get(&key.identifier) {
            Some(existing) if existing.region.same_filter(&key) => Registration::AlreadyActive,
            Some(_) => Registration::Replaced,
            None => Registration::Added,
        };
        if outcome == Registration::AlreadyActive {
            return (outcome, None);
        }
        debug!(region = %key, ?outcome, "Monitoring registered");
        let displaced = tables.monitored.insert(
            key.identifier.clone(),
            MonitoredRegion {
                region: key,
                state: RegionState::Unknown,
            },
        );
        (outcome, displaced)
    }

    /// Removes `identifier` from monitoring, returning the removed entry.
    pub fn stop_monitoring(&self, identifier: &str) -> Option<MonitoredRegion> {
        self.tables.lock().monitored.remove(identifier)
    }

    /// Puts `identifier` back the way it was before a start or stop.
    ///
    /// `None` means the identifier was not monitored.
    pub fn restore_monitoring(&self, identifier: &str, previous: Option<MonitoredRegion>) {
        let mut tables = self.tables.lock();
        match previous {
            Some(previous) => {
                debug!(region = %previous.region, "Monitoring entry restored");
                tables.monitored.insert(identifier.to_string(), previous);
            }
            None => {
                tables.monitored.remove(identifier);
            }
        }
    }

    /// Registers `key` for ranging, returning the displaced key on replacement.
    pub fn start_ranging(&self, key: RegionKey) -> (Registration, Option<RegionKey>) {
        let mut tables = self.tables.lock();
        let outcome = match tables.ranged.get(&key.identifier) {
            Some(existing) if existing.same_filter(&key) => Registration::AlreadyActive,
            Some(_) => Registration::Replaced,
            None => Registration::Added,
        };
        if outcome == Registration::AlreadyActive {
            return (outcome, None);
        }
        debug!(region = %key, ?outcome, "Ranging registered");
        let displaced = tables.ranged.insert(key.identifier.clone(), key);
        (outcome, displaced)
    }

    /// Removes `identifier` from ranging, returning the removed key.
    pub fn stop_ranging(&self, identifier: &str) -> Option<RegionKey> {
        self.tables.lock().ranged.remove(identifier)
    }

    /// Ranging counterpart of [`restore_monitoring`](Self::restore_monitoring).
    pub fn restore_ranging(&self, identifier: &str, previous: Option<RegionKey>) {
        let mut tables = self.tables.lock();
        match previous {
            Some(previous) => {
                tables.ranged.insert(identifier.to_string(), previous);
            }
            None => {
                tables.ranged.remove(identifier);
            }
        }
    }

    /// Key of a monitored region, if active.
    #[must_use]
    pub fn monitored(&self, identifier: &str) -> Option<RegionKey> {
        self.tables
            .lock()
            .monitored
            .get(identifier)
            .map(|m| m.region.clone())
    }

    /// Key of a ranged region, if active.
    #[must_use]
    pub fn ranged(&self, identifier: &str) -> Option<RegionKey> {
        self.tables.lock().ranged.get(identifier).cloned()
    }

    /// Resolves an engine region token to an active key.
    ///
    /// The table matching `kind` is consulted first, so a ranging callback
    /// carries the ranged key even when the identifier is also monitored.
    #[must_use]
    pub fn resolve(&self, raw: &RawRegion, kind: CallbackKind) -> Option<RegionKey> {
        let tables = self.tables.lock();
        let monitored = || tables.monitored.get(&raw.unique_id).map(|m| m.region.clone());
        let ranged = || tables.ranged.get(&raw.unique_id).cloned();
        match kind {
            CallbackKind::Monitoring => monitored().or_else(ranged),
            CallbackKind::Ranging => ranged().or_else(monitored),
        }
    }

    /// Records a state for a monitored region.
    ///
    /// Returns `false` (and changes nothing) if the region is not monitored.
    pub fn record_state(&self, identifier: &str, state: RegionState) -> bool {
        self.tables
            .lock()
            .monitored
            .get_mut(identifier)
            .map(|m| m.state = state)
            .is_some()
    }

    /// Monitored regions sorted by identifier.
    #[must_use]
    pub fn list_monitored(&self) -> Vec<MonitoredRegion> {
        let mut regions: Vec<_> = self.tables.lock().monitored.values().cloned().collect();
        regions.sort_by(|a, b| a.region.identifier.cmp(&b.region.identifier));
        regions
    }

    /// Ranged regions sorted by identifier.
    #[must_use]
    pub fn list_ranged(&self) -> Vec<RegionKey> {
        let mut regions: Vec<_> = self.tables.lock().ranged.values().cloned().collect();
        regions.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        regions
    }

    /// Removes every region, returning what was active as `(monitored, ranged)`.
    pub fn clear(&self) -> (Vec<RegionKey>, Vec<RegionKey>) {
        let mut tables = self.tables.lock();
        let monitored = tables.monitored.drain().map(|(_, m)| m.region).collect();
        let ranged = tables.ranged.drain().map(|(_, k)| k).collect();
        (monitored, ranged)
    }
}
