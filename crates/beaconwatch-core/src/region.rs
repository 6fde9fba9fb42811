//! Region identity and state.
//!
//! A [`RegionKey`] names a filter the scanning engine matches advertisements
//! against. The caller-chosen `identifier` is the primary key: two keys are
//! equal iff their identifiers match, the uuid/major/minor fields are
//! descriptive.
//!
//! Absent sub-identifiers are wildcards. `None` and `Some(0)` are different
//! filters and must stay different all the way to the engine.

use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{BeaconError, Result};

/// Decimal (up to 5 digits) or `0x`-prefixed hexadecimal (up to 4 digits).
static SUB_IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:0[xX][0-9a-fA-F]{1,4}|[0-9]{1,5})$").expect("Invalid regex pattern")
});

const UUID_HINT: &str = "Expected a 128-bit UUID such as 'E2C56DB5-DFFB-48D2-B060-D0F5A71096E0'.";
const SUB_ID_HINT: &str = "Expected an empty string, a decimal 0-65535, or hex 0x0000-0xFFFF.";
const IDENTIFIER_HINT: &str = "Region identifier must not be empty.";

/// Identity of a monitored or ranged region.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": "lobby",
    "uuid": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
    "major": 1,
    "minor": null
}))]
pub struct RegionKey {
    /// Caller-chosen unique key.
    #[schema(example = "lobby")]
    pub identifier: String,

    /// Namespace identifier every matching beacon must carry.
    #[schema(value_type = String, example = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0")]
    pub uuid: Uuid,

    /// Optional major filter. `None` matches any major.
    pub major: Option<u16>,

    /// Optional minor filter. `None` matches any minor.
    pub minor: Option<u16>,
}

impl RegionKey {
    /// Builds a key from already-typed parts.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidIdentifier`] if `identifier` is empty.
    pub fn new(
        identifier: impl Into<String>,
        uuid: Uuid,
        major: Option<u16>,
        minor: Option<u16>,
    ) -> Result<Self> {
        let identifier = identifier.into();
        if identifier.trim().is_empty() {
            return Err(BeaconError::invalid("identifier", identifier, IDENTIFIER_HINT));
        }
        Ok(Self {
            identifier,
            uuid,
            major,
            minor,
        })
    }

    /// Parses a key from the string form used by command surfaces.
    ///
    /// Argument order follows the command surface: minor before major.
    /// Empty `minor`/`major` strings mean "absent", never zero.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::InvalidIdentifier`] naming the first malformed
    /// component. Nothing is registered when this fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use beaconwatch_core::RegionKey;
    ///
    /// let key = RegionKey::parse("r1", "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0", "", "7").unwrap();
    /// assert_eq!(key.major, Some(7));
    /// assert_eq!(key.minor, None);
    /// ```
    pub fn parse(identifier: &str, uuid: &str, minor: &str, major: &str) -> Result<Self> {
        let uuid = parse_uuid(uuid)?;
        let minor = parse_sub_identifier("minor", minor)?;
        let major = parse_sub_identifier("major", major)?;
        Self::new(identifier, uuid, major, minor)
    }

    /// Upper-case hyphenated uuid, the form used in every payload.
    #[must_use]
    pub fn uuid_string(&self) -> String {
        format!("{:X}", self.uuid.hyphenated())
    }

    /// Returns `true` if every sub-identifier field of `other` matches this key.
    #[must_use]
    pub fn same_filter(&self, other: &Self) -> bool {
        self.uuid == other.uuid && self.major == other.major && self.minor == other.minor
    }
}

impl PartialEq for RegionKey {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for RegionKey {}

impl Hash for RegionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}", self.identifier, self.uuid_string())?;
        match self.major {
            Some(major) => write!(f, " {major}")?,
            None => f.write_str(" *")?,
        }
        match self.minor {
            Some(minor) => write!(f, " {minor}]"),
            None => f.write_str(" *]"),
        }
    }
}

/// Monitoring state of a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    /// No determination has been made yet.
    #[default]
    Unknown,
    /// The device is inside the region.
    Inside,
    /// The device is outside the region.
    Outside,
}

impl RegionState {
    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Inside => "inside",
            Self::Outside => "outside",
        }
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a region uuid.
///
/// # Errors
///
/// Returns [`BeaconError::InvalidIdentifier`] unless `value` is a 16-byte UUID
/// in hyphenated or simple form.
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    // Uuid::parse_str also accepts braced and urn forms; the engine does not.
    if trimmed.starts_with('{') || trimmed.starts_with("urn:") {
        return Err(BeaconError::invalid("uuid", value, UUID_HINT));
    }
    Uuid::parse_str(trimmed).map_err(|_| BeaconError::invalid("uuid", value, UUID_HINT))
}

/// Parses an optional 16-bit sub-identifier. Empty input means absent.
///
/// # Errors
///
/// Returns [`BeaconError::InvalidIdentifier`] for anything that is not empty,
/// a decimal in `0..=65535`, or a `0x` hex value of at most four digits.
pub fn parse_sub_identifier(field: &'static str, value: &str) -> Result<Option<u16>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !SUB_IDENTIFIER_REGEX.is_match(trimmed) {
        return Err(BeaconError::invalid(field, value, SUB_ID_HINT));
    }
    let parsed = match trimmed.get(..2) {
        Some("0x" | "0X") => u16::from_str_radix(&trimmed[2..], 16),
        _ => trimmed.parse::<u16>(),
    };
    parsed
        .map(Some)
        .map_err(|_| BeaconError::invalid(field, value, SUB_ID_HINT))
}

/// Maps an integer command argument to the string form [`RegionKey::parse`] takes.
///
/// Command surfaces pass `-1` (or nothing) to mean "absent".
#[must_use]
pub fn sub_identifier_arg(value: Option<i64>) -> String {
    match value {
        None | Some(-1) => String::new(),
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const UUID: &str = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0";

    #[test]
    fn test_empty_sub_identifiers_are_absent_not_zero() {
        let key = RegionKey::parse("r1", UUID, "", "").unwrap();
        assert_eq!(key.major, None);
        assert_eq!(key.minor, None);

        let zero = RegionKey::parse("r1", UUID, "0", "0").unwrap();
        assert_eq!(zero.major, Some(0));
        assert_eq!(zero.minor, Some(0));

        assert!(!key.same_filter(&zero));
    }

    #[test]
    fn test_parse_minor_before_major() {
        let key = RegionKey::parse("r1", UUID, "2", "1").unwrap();
        assert_eq!(key.major, Some(1));
        assert_eq!(key.minor, Some(2));
    }

    #[test]
    fn test_parse_hex_sub_identifier() {
        assert_eq!(parse_sub_identifier("major", "0xFFFF").unwrap(), Some(65535));
        assert_eq!(parse_sub_identifier("major", "0x1a").unwrap(), Some(26));
    }

    #[test]
    fn test_rejects_malformed_sub_identifiers() {
        for bad in ["65536", "-3", "abc", "0x12345", "1.5", "99999"] {
            let err = parse_sub_identifier("minor", bad).unwrap_err();
            assert!(err.is_invalid_identifier(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_rejects_malformed_uuid() {
        for bad in ["", "E2C56DB5", "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0FF", "zzzz"] {
            let err = RegionKey::parse("r1", bad, "", "").unwrap_err();
            assert!(
                matches!(err, BeaconError::InvalidIdentifier { field: "uuid", .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_accepts_simple_uuid_form() {
        let key = RegionKey::parse("r1", "e2c56db5dffb48d2b060d0f5a71096e0", "", "").unwrap();
        assert_eq!(key.uuid_string(), UUID);
    }

    #[test]
    fn test_rejects_empty_identifier() {
        let err = RegionKey::parse("  ", UUID, "", "").unwrap_err();
        assert!(matches!(
            err,
            BeaconError::InvalidIdentifier {
                field: "identifier",
                ..
            }
        ));
    }

    #[test]
    fn test_equality_uses_identifier_only() {
        let a = RegionKey::parse("door", UUID, "1", "1").unwrap();
        let b = RegionKey::parse("door", "00000000-0000-0000-0000-000000000001", "", "").unwrap();
        let c = RegionKey::parse("window", UUID, "1", "1").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<RegionKey> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_sub_identifier_arg_sentinel() {
        assert_eq!(sub_identifier_arg(None), "");
        assert_eq!(sub_identifier_arg(Some(-1)), "");
        assert_eq!(sub_identifier_arg(Some(0)), "0");
        assert_eq!(sub_identifier_arg(Some(70000)), "70000");
        assert!(parse_sub_identifier("major", &sub_identifier_arg(Some(70000))).is_err());
    }

    #[test]
    fn test_display() {
        let key = RegionKey::parse("r1", UUID, "", "4").unwrap();
        assert_eq!(key.to_string(), format!("r1 [{UUID} 4 *]"));
    }

    #[test]
    fn test_region_state_serialization() {
        assert_eq!(serde_json::to_string(&RegionState::Inside).unwrap(), "\"inside\"");
        assert_eq!(RegionState::default(), RegionState::Unknown);
        assert_eq!(RegionState::Outside.as_str(), "outside");
    }
}
