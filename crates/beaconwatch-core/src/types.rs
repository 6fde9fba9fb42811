//! Shared types and OpenAPI schemas.
//!
//! Sightings and envelopes flow from the translator to the dispatcher; the
//! payload types are what the live bus and the deferred sink see on the wire.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::region::{RegionKey, RegionState};

/// Coarse distance bucket derived from an estimated distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Proximity {
    /// Distance could not be estimated.
    Unknown,
    /// Closer than one metre.
    Immediate,
    /// One to three metres.
    Near,
    /// Three metres or more.
    Far,
}

impl Proximity {
    /// Wire name of the bucket.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Immediate => "immediate",
            Self::Near => "near",
            Self::Far => "far",
        }
    }
}

/// One ranging observation of a single beacon.
///
/// Built fresh every scan cycle by the translator and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "uuid": "e2c56db5-dffb-48d2-b060-d0f5a71096e0",
    "major": 1,
    "minor": 4,
    "rssi": -67,
    "distance": 1.82,
    "proximity": "near"
}))]
pub struct Sighting {
    /// First identifier of the advertisement.
    pub uuid: String,

    /// Second identifier, only when the advertisement has more than two.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<u16>,

    /// Third identifier, only when the advertisement has more than two.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<u16>,

    /// Raw signal strength in dBm.
    #[schema(example = -67)]
    pub rssi: i32,

    /// Estimated distance in metres, `999.0` when the engine had no estimate.
    #[schema(example = 1.82)]
    pub distance: f64,

    /// Bucket derived from `distance`.
    pub proximity: Proximity,
}

/// Sightings for one region from one scan cycle, in engine order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingBatch {
    /// Region the sightings were ranged in.
    pub region: RegionKey,
    /// Sightings as the engine supplied them.
    pub sightings: Vec<Sighting>,
}

/// Kind of a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventTag {
    /// The device entered a region.
    Enter,
    /// The device left a region.
    Exit,
    /// The engine determined the state of a region.
    State,
    /// A ranging cycle completed.
    Range,
}

impl EventTag {
    /// Event name on the live bus.
    #[must_use]
    pub const fn bus_name(self) -> &'static str {
        match self {
            Self::Enter => "regionDidEnter",
            Self::Exit => "regionDidExit",
            Self::State => "didDetermineState",
            Self::Range => "beaconsDidRange",
        }
    }

    /// Tag carried by deferred records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::State => "state",
            Self::Range => "range",
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bus_name())
    }
}

/// Unit handed from the translator to the dispatcher.
///
/// Moved into [`Dispatcher::dispatch`](crate::dispatcher::Dispatcher::dispatch),
/// which routes it exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEnvelope {
    /// Result of a state determination.
    StateDetermined {
        /// Region the state applies to.
        region: RegionKey,
        /// Mapped state.
        state: RegionState,
    },
    /// Region entry.
    RegionEntered {
        /// Region that was entered.
        region: RegionKey,
    },
    /// Region exit.
    RegionExited {
        /// Region that was left.
        region: RegionKey,
    },
    /// Ranging results.
    BeaconsRanged(RangingBatch),
}

impl DispatchEnvelope {
    /// Tag of this envelope.
    #[must_use]
    pub const fn tag(&self) -> EventTag {
        match self {
            Self::StateDetermined { .. } => EventTag::State,
            Self::RegionEntered { .. } => EventTag::Enter,
            Self::RegionExited { .. } => EventTag::Exit,
            Self::BeaconsRanged(_) => EventTag::Range,
        }
    }

    /// Region this envelope belongs to.
    #[must_use]
    pub const fn region(&self) -> &RegionKey {
        match self {
            Self::StateDetermined { region, .. }
            | Self::RegionEntered { region }
            | Self::RegionExited { region } => region,
            Self::BeaconsRanged(batch) => &batch.region,
        }
    }

    /// Converts the envelope into its live bus form.
    #[must_use]
    pub fn into_bus_event(self) -> BusEvent {
        let tag = self.tag();
        let payload = match self {
            Self::StateDetermined { region, state } => {
                BusPayload::Monitoring(MonitoringPayload::new(&region, Some(state)))
            }
            Self::RegionEntered { region } | Self::RegionExited { region } => {
                BusPayload::Monitoring(MonitoringPayload::new(&region, None))
            }
            Self::BeaconsRanged(batch) => BusPayload::Ranging(RangingPayload {
                region: RangedRegionPayload {
                    identifier: batch.region.identifier.clone(),
                    uuid: batch.region.uuid_string(),
                },
                beacons: batch.sightings,
            }),
        };
        BusEvent {
            event: tag.bus_name().to_string(),
            payload,
        }
    }

    /// Flattens the envelope into a deferred record.
    #[must_use]
    pub fn into_deferred_record(self) -> DeferredRecord {
        let event = self.tag();
        let (region, state, beacons) = match self {
            Self::StateDetermined { region, state } => (region, Some(state), None),
            Self::RegionEntered { region } | Self::RegionExited { region } => (region, None, None),
            Self::BeaconsRanged(batch) => (batch.region, None, Some(batch.sightings)),
        };
        DeferredRecord {
            id: Uuid::now_v7(),
            event,
            uuid: region.uuid_string(),
            major: region.major.unwrap_or(0),
            minor: region.minor.unwrap_or(0),
            identifier: region.identifier,
            state,
            beacons,
            enqueued_at_utc: Utc::now(),
        }
    }
}

/// Payload of `regionDidEnter`, `regionDidExit` and `didDetermineState`.
///
/// Absent major/minor are written as `0`, the consumer's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": "r1",
    "uuid": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
    "major": 0,
    "minor": 0,
    "state": "inside"
}))]
pub struct MonitoringPayload {
    /// Region identifier.
    pub identifier: String,
    /// Region uuid.
    pub uuid: String,
    /// Region major, `0` when absent.
    pub major: u16,
    /// Region minor, `0` when absent.
    pub minor: u16,
    /// Determined state, only on `didDetermineState`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RegionState>,
}

impl MonitoringPayload {
    fn new(region: &RegionKey, state: Option<RegionState>) -> Self {
        Self {
            identifier: region.identifier.clone(),
            uuid: region.uuid_string(),
            major: region.major.unwrap_or(0),
            minor: region.minor.unwrap_or(0),
            state,
        }
    }
}

/// Region part of a `beaconsDidRange` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RangedRegionPayload {
    /// Region identifier.
    pub identifier: String,
    /// Region uuid.
    pub uuid: String,
}

/// Payload of `beaconsDidRange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RangingPayload {
    /// Region that was ranged.
    pub region: RangedRegionPayload,
    /// Sightings in engine order.
    pub beacons: Vec<Sighting>,
}

/// Payload variants carried on the live bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum BusPayload {
    /// Monitoring event payload.
    Monitoring(MonitoringPayload),
    /// Ranging event payload.
    Ranging(RangingPayload),
    /// Payload-less notice such as `beaconServiceConnected`.
    Empty(serde_json::Value),
}

/// A named event on the live bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BusEvent {
    /// Event name, e.g. `regionDidEnter`.
    #[schema(example = "regionDidEnter")]
    pub event: String,
    /// Structured payload.
    pub payload: BusPayload,
}

impl BusEvent {
    /// Event emitted once the coordinator is connected to its engine.
    pub const SERVICE_CONNECTED: &'static str = "beaconServiceConnected";

    /// Builds the `beaconServiceConnected` notice.
    #[must_use]
    pub fn service_connected() -> Self {
        Self {
            event: Self::SERVICE_CONNECTED.to_string(),
            payload: BusPayload::Empty(serde_json::Value::Null),
        }
    }
}

/// Flattened record handed to the deferred-delivery collaborator.
///
/// Delivery is at-least-once; consumers de-duplicate on `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "01890a5d-ac96-774b-bcce-b302099a8057",
    "event": "enter",
    "identifier": "r1",
    "uuid": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
    "major": 0,
    "minor": 0,
    "enqueued_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct DeferredRecord {
    /// Time-ordered record id (UUIDv7).
    #[schema(value_type = String)]
    pub id: Uuid,
    /// What happened.
    pub event: EventTag,
    /// Region identifier.
    pub identifier: String,
    /// Region uuid.
    pub uuid: String,
    /// Region major, `0` when absent.
    pub major: u16,
    /// Region minor, `0` when absent.
    pub minor: u16,
    /// Determined state, only for `state` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RegionState>,
    /// Sightings, only for `range` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacons: Option<Vec<Sighting>>,
    /// When the dispatcher deferred the event.
    pub enqueued_at_utc: DateTime<Utc>,
}

impl DeferredRecord {
    /// Rebuilds the live bus form of the record.
    #[must_use]
    pub fn into_bus_event(self) -> BusEvent {
        let event = self.event.bus_name().to_string();
        let payload = match self.event {
            EventTag::Range => BusPayload::Ranging(RangingPayload {
                region: RangedRegionPayload {
                    identifier: self.identifier,
                    uuid: self.uuid,
                },
                beacons: self.beacons.unwrap_or_default(),
            }),
            EventTag::Enter | EventTag::Exit | EventTag::State => {
                BusPayload::Monitoring(MonitoringPayload {
                    identifier: self.identifier,
                    uuid: self.uuid,
                    major: self.major,
                    minor: self.minor,
                    state: self.state,
                })
            }
        };
        BusEvent { event, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> RegionKey {
        RegionKey::parse("r1", "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0", "", "").unwrap()
    }

    #[test]
    fn test_state_payload_matches_consumer_format() {
        let envelope = DispatchEnvelope::StateDetermined {
            region: region(),
            state: RegionState::Inside,
        };
        let event = envelope.into_bus_event();
        assert_eq!(event.event, "didDetermineState");

        let json = serde_json::to_value(&event.payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "identifier": "r1",
                "uuid": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
                "major": 0,
                "minor": 0,
                "state": "inside"
            })
        );
    }

    #[test]
    fn test_enter_payload_has_no_state() {
        let event = DispatchEnvelope::RegionEntered { region: region() }.into_bus_event();
        let json = serde_json::to_string(&event.payload).unwrap();
        assert!(!json.contains("state"));
        assert_eq!(event.event, "regionDidEnter");
    }

    #[test]
    fn test_sighting_omits_absent_major_minor() {
        let sighting = Sighting {
            uuid: "abc".into(),
            major: None,
            minor: None,
            rssi: -80,
            distance: 999.0,
            proximity: Proximity::Far,
        };
        let json = serde_json::to_string(&sighting).unwrap();
        assert!(!json.contains("major"));
        assert!(json.contains("\"proximity\":\"far\""));
    }

    #[test]
    fn test_deferred_record_flattening() {
        let envelope = DispatchEnvelope::RegionExited { region: region() };
        let record = envelope.into_deferred_record();
        assert_eq!(record.event, EventTag::Exit);
        assert_eq!(record.identifier, "r1");
        assert_eq!(record.major, 0);
        assert!(record.state.is_none());

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"event\":\"exit\""));
    }

    #[test]
    fn test_deferred_record_rebuilds_bus_event() {
        let envelope = DispatchEnvelope::StateDetermined {
            region: region(),
            state: RegionState::Outside,
        };
        let live = envelope.clone().into_bus_event();
        let rebuilt = envelope.into_deferred_record().into_bus_event();
        assert_eq!(live, rebuilt);
    }

    #[test]
    fn test_ranging_envelope_keeps_engine_order() {
        let sightings: Vec<Sighting> = (0..3)
            .map(|i| Sighting {
                uuid: format!("b{i}"),
                major: None,
                minor: None,
                rssi: -60 - i,
                distance: 2.0,
                proximity: Proximity::Near,
            })
            .collect();
        let envelope = DispatchEnvelope::BeaconsRanged(RangingBatch {
            region: region(),
            sightings,
        });
        assert_eq!(envelope.tag(), EventTag::Range);

        let event = envelope.into_bus_event();
        match event.payload {
            BusPayload::Ranging(payload) => {
                let order: Vec<&str> = payload.beacons.iter().map(|b| b.uuid.as_str()).collect();
                assert_eq!(order, ["b0", "b1", "b2"]);
                assert_eq!(payload.region.identifier, "r1");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
