//! Raw engine callbacks to dispatch envelopes.
//!
//! Everything here is pure. Numeric edge cases (non-finite distances,
//! unknown state codes, short identifier lists) are absorbed rather than
//! reported: the engine has no error channel to report them back on.

use tracing::warn;

use crate::engine::{RawBeacon, STATE_INSIDE, STATE_OUTSIDE};
use crate::region::{parse_sub_identifier, RegionKey, RegionState};
use crate::types::{DispatchEnvelope, Proximity, RangingBatch, Sighting};

/// Distance reported for a beacon the engine could not estimate.
pub const UNKNOWN_DISTANCE: f64 = 999.0;

/// Upper bound (exclusive) of the `Immediate` bucket, in metres.
pub const IMMEDIATE_LIMIT: f64 = 1.0;

/// Upper bound (exclusive) of the `Near` bucket, in metres.
pub const NEAR_LIMIT: f64 = 3.0;

/// Maps an engine state code to a [`RegionState`].
///
/// Total: codes other than inside/outside become [`RegionState::Unknown`].
#[must_use]
pub const fn map_raw_state(raw_state: i32) -> RegionState {
    match raw_state {
        STATE_INSIDE => RegionState::Inside,
        STATE_OUTSIDE => RegionState::Outside,
        _ => RegionState::Unknown,
    }
}

/// Sanitizes a distance estimate and buckets it.
///
/// Non-finite input yields `(999.0, Far)`. Finite input is returned as-is
/// with its bucket.
///
/// # Examples
///
/// ```
/// use beaconwatch_core::translator::classify_distance;
/// use beaconwatch_core::Proximity;
///
/// assert_eq!(classify_distance(0.999), (0.999, Proximity::Immediate));
/// assert_eq!(classify_distance(3.0), (3.0, Proximity::Far));
/// assert_eq!(classify_distance(f64::NAN), (999.0, Proximity::Far));
/// ```
#[must_use]
pub fn classify_distance(distance: f64) -> (f64, Proximity) {
    if !distance.is_finite() {
        return (UNKNOWN_DISTANCE, Proximity::Far);
    }
    let proximity = if distance < 0.0 {
        Proximity::Unknown
    } else if distance < IMMEDIATE_LIMIT {
        Proximity::Immediate
    } else if distance < NEAR_LIMIT {
        Proximity::Near
    } else {
        Proximity::Far
    };
    (distance, proximity)
}

/// Builds a state determination envelope.
#[must_use]
pub const fn translate_state_change(raw_state: i32, region: RegionKey) -> DispatchEnvelope {
    DispatchEnvelope::StateDetermined {
        region,
        state: map_raw_state(raw_state),
    }
}

/// Builds a region entry envelope.
#[must_use]
pub const fn translate_enter(region: RegionKey) -> DispatchEnvelope {
    DispatchEnvelope::RegionEntered { region }
}

/// Builds a region exit envelope.
#[must_use]
pub const fn translate_exit(region: RegionKey) -> DispatchEnvelope {
    DispatchEnvelope::RegionExited { region }
}

/// Builds a ranging envelope, keeping the engine's beacon order.
#[must_use]
pub fn translate_ranging(beacons: &[RawBeacon], region: RegionKey) -> DispatchEnvelope {
    let sightings = beacons.iter().map(to_sighting).collect();
    DispatchEnvelope::BeaconsRanged(RangingBatch { region, sightings })
}

fn to_sighting(beacon: &RawBeacon) -> Sighting {
    let (distance, proximity) = classify_distance(beacon.distance);
    let slots = &beacon.identifiers;
    // Major/minor only exist for three-identifier layouts.
    let (major, minor) = if slots.len() > 2 {
        (sub_identifier(&slots[1]), sub_identifier(&slots[2]))
    } else {
        (None, None)
    };
    Sighting {
        uuid: slots.first().cloned().unwrap_or_default(),
        major,
        minor,
        rssi: beacon.rssi,
        distance,
        proximity,
    }
}

fn sub_identifier(slot: &str) -> Option<u16> {
    match parse_sub_identifier("beacon identifier", slot) {
        Ok(value) => value,
        Err(e) => {
            warn!(slot, error = %e, "Dropping unparseable beacon sub-identifier");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> RegionKey {
        RegionKey::parse("r1", "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0", "", "").unwrap()
    }

    fn beacon(identifiers: &[&str], distance: f64) -> RawBeacon {
        RawBeacon {
            identifiers: identifiers.iter().map(ToString::to_string).collect(),
            rssi: -70,
            distance,
        }
    }

    #[test]
    fn test_distance_table() {
        let cases = [
            (-0.5, Proximity::Unknown),
            (0.0, Proximity::Immediate),
            (0.999, Proximity::Immediate),
            (1.0, Proximity::Near),
            (1.5, Proximity::Near),
            (2.999, Proximity::Near),
            (3.0, Proximity::Far),
            (5.0, Proximity::Far),
        ];
        for (input, expected) in cases {
            let (distance, proximity) = classify_distance(input);
            assert_eq!(proximity, expected, "distance {input}");
            assert!((distance - input).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_non_finite_distance_is_sentinel_far() {
        for input in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            assert_eq!(classify_distance(input), (UNKNOWN_DISTANCE, Proximity::Far));
        }
    }

    #[test]
    fn test_state_mapping_is_total() {
        assert_eq!(map_raw_state(1), RegionState::Inside);
        assert_eq!(map_raw_state(0), RegionState::Outside);
        assert_eq!(map_raw_state(-1), RegionState::Unknown);
        assert_eq!(map_raw_state(42), RegionState::Unknown);
    }

    #[test]
    fn test_translate_state_change() {
        let envelope = translate_state_change(1, region());
        assert_eq!(
            envelope,
            DispatchEnvelope::StateDetermined {
                region: region(),
                state: RegionState::Inside
            }
        );
    }

    #[test]
    fn test_ranging_with_nan_distance() {
        let envelope = translate_ranging(&[beacon(&["abc", "1", "2"], f64::NAN)], region());
        let DispatchEnvelope::BeaconsRanged(batch) = envelope else {
            panic!("expected ranging envelope");
        };
        let sighting = &batch.sightings[0];
        assert_eq!(sighting.distance, 999.0);
        assert_eq!(sighting.proximity, Proximity::Far);
        assert_eq!(sighting.major, Some(1));
        assert_eq!(sighting.minor, Some(2));
        assert_eq!(sighting.rssi, -70);
    }

    #[test]
    fn test_major_minor_only_with_three_slots() {
        let envelope = translate_ranging(
            &[beacon(&["abc", "1"], 2.0), beacon(&["def"], 0.5)],
            region(),
        );
        let DispatchEnvelope::BeaconsRanged(batch) = envelope else {
            panic!("expected ranging envelope");
        };
        assert!(batch.sightings.iter().all(|s| s.major.is_none() && s.minor.is_none()));
        assert_eq!(batch.sightings[0].uuid, "abc");
        assert_eq!(batch.sightings[1].uuid, "def");
    }

    #[test]
    fn test_unparseable_sub_identifier_is_dropped() {
        let envelope = translate_ranging(&[beacon(&["abc", "nope", "0x10"], 1.0)], region());
        let DispatchEnvelope::BeaconsRanged(batch) = envelope else {
            panic!("expected ranging envelope");
        };
        assert_eq!(batch.sightings[0].major, None);
        assert_eq!(batch.sightings[0].minor, Some(16));
    }

    #[test]
    fn test_empty_ranging_batch() {
        let envelope = translate_ranging(&[], region());
        assert_eq!(
            envelope,
            DispatchEnvelope::BeaconsRanged(RangingBatch {
                region: region(),
                sightings: Vec::new()
            })
        );
    }
}
