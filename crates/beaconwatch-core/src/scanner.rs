//! Scanner settings passed through to the engine.
//!
//! None of these carry state machines. They select the engine's RSSI
//! smoothing filter, its scan cadence, the advertisement layouts it parses,
//! and whether it runs a persistent foreground service.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{BeaconError, Result};

/// Layout of an iBeacon advertisement, registered by default.
pub const IBEACON_LAYOUT: &str = "m:0-3=4c000215,i:4-19,i:20-21,i:22-23,p:24-24";

/// One `<kind>:<start>-<end>[=hex][l|v]` term of a layout expression.
static LAYOUT_TERM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[mispdx]):\d{1,2}-\d{1,2}(?:=[0-9a-fA-F]+)?[lv]?$")
        .expect("Invalid regex pattern")
});

/// RSSI smoothing strategy implemented by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RssiFilter {
    /// Running average over a sample window.
    RunningAverage,
    /// Auto-regressive moving average.
    Arma,
}

/// Selected RSSI filter plus its optional tuning parameter.
///
/// For [`RssiFilter::RunningAverage`] the tuning is the sample expiration in
/// milliseconds; for [`RssiFilter::Arma`] it is the ARMA speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FilterSettings {
    /// Filter kind.
    pub kind: RssiFilter,
    /// Tuning parameter, kept only when positive.
    pub tuning: Option<f64>,
}

impl FilterSettings {
    /// Builds settings, dropping a tuning value that is not `> 0`.
    #[must_use]
    pub fn new(kind: RssiFilter, tuning: f64) -> Self {
        Self {
            kind,
            tuning: (tuning > 0.0).then_some(tuning),
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            kind: RssiFilter::RunningAverage,
            tuning: None,
        }
    }
}

/// Scan cadence in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ScanPeriods {
    /// Scan length while the host is live.
    #[schema(example = 1100)]
    pub foreground_scan_ms: u64,
    /// Pause between scans while the host is live.
    #[schema(example = 0)]
    pub foreground_between_scan_ms: u64,
    /// Scan length while the host is suspended.
    #[schema(example = 10000)]
    pub background_scan_ms: u64,
    /// Pause between scans while the host is suspended.
    #[schema(example = 300_000)]
    pub background_between_scan_ms: u64,
}

impl Default for ScanPeriods {
    fn default() -> Self {
        Self {
            foreground_scan_ms: 1_100,
            foreground_between_scan_ms: 0,
            background_scan_ms: 10_000,
            background_between_scan_ms: 300_000,
        }
    }
}

impl ScanPeriods {
    /// Checks that both scan windows are non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidScannerSetting`] for a zero scan window.
    pub fn validate(&self) -> Result<()> {
        if self.foreground_scan_ms == 0 {
            return Err(BeaconError::InvalidScannerSetting(
                "foreground_scan_ms must be greater than 0".into(),
            ));
        }
        if self.background_scan_ms == 0 {
            return Err(BeaconError::InvalidScannerSetting(
                "background_scan_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Notification shown while the persistent foreground scanning service runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "channel_id": "beacons",
    "channel_name": "Beacon scanning",
    "icon_name": "ic_beacon",
    "title": "Scanning for beacons",
    "activity_name": "com.example.MainActivity"
}))]
pub struct ForegroundServiceConfig {
    /// Notification channel id.
    pub channel_id: String,
    /// Notification channel display name.
    pub channel_name: String,
    /// Icon resource name.
    pub icon_name: String,
    /// Notification title.
    pub title: String,
    /// Activity opened when the notification is tapped.
    pub activity_name: String,
}

impl ForegroundServiceConfig {
    /// Checks that the channel id and title are set.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidScannerSetting`] naming the empty field.
    pub fn validate(&self) -> Result<()> {
        if self.channel_id.trim().is_empty() {
            return Err(BeaconError::InvalidScannerSetting(
                "channel_id must not be empty".into(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(BeaconError::InvalidScannerSetting(
                "title must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Returns `true` if `layout` looks like an advertisement layout expression.
///
/// Only the shape is checked; the engine owns the semantics.
///
/// # Examples
///
/// ```
/// use beaconwatch_core::scanner::{is_valid_beacon_layout, IBEACON_LAYOUT};
///
/// assert!(is_valid_beacon_layout(IBEACON_LAYOUT));
/// assert!(!is_valid_beacon_layout("i:4-19"));
/// ```
#[must_use]
pub fn is_valid_beacon_layout(layout: &str) -> bool {
    let terms: Vec<&str> = layout.split(',').map(str::trim).collect();
    terms.iter().any(|t| t.starts_with("m:")) && terms.iter().all(|t| LAYOUT_TERM_REGEX.is_match(t))
}
