//! License durations
//!
//! A license lasts either a fixed number of seconds or is unlimited.
//! When a record carries no explicit duration, the duration is derived from
//! markers in the key itself, e.g. `Soryn-ABCDE-1month` or `Soryn-ABCDE-lifetime`.

use std::{fmt, num::NonZeroU64, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const SECS_PER_DAY: u64 = 86_400;
pub const SECS_PER_WEEK: u64 = 7 * SECS_PER_DAY;
pub const SECS_PER_MONTH: u64 = 30 * SECS_PER_DAY;
pub const SECS_PER_YEAR: u64 = 365 * SECS_PER_DAY;

/// Expiry sent upstream for unlimited licenses: ten years.
pub const UNLIMITED_EXPIRY_SECS: u64 = 10 * SECS_PER_YEAR;

/// Lifetime of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LicenseDuration {
    /// Fixed lifetime in seconds
    Seconds(NonZeroU64),
    /// No expiry
    Unlimited,
}

impl LicenseDuration {
    /// Returns a fixed duration, or `Unlimited` for zero.
    pub fn from_secs(secs: u64) -> Self {
        NonZeroU64::new(secs).map_or(Self::Unlimited, Self::Seconds)
    }

    /// Expiry in seconds as sent to the upstream api
    pub fn expiry_secs(&self) -> u64 {
        match self {
            Self::Seconds(secs) => secs.get(),
            Self::Unlimited => UNLIMITED_EXPIRY_SECS,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl fmt::Display for LicenseDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(secs) => write!(f, "{secs}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl FromStr for LicenseDuration {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("unlimited") || input.eq_ignore_ascii_case("lifetime") {
            return Ok(Self::Unlimited);
        }
        input
            .parse::<u64>()
            .map(Self::from_secs)
            .map_err(|_| format!("invalid duration '{input}': expected seconds or 'unlimited'"))
    }
}

impl Serialize for LicenseDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Seconds(secs) => serializer.serialize_u64(secs.get()),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for LicenseDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        duration_from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {value}")))
    }
}

/// Reads a duration from a json number or string. Returns None for other shapes.
pub(crate) fn duration_from_value(value: &serde_json::Value) -> Option<LicenseDuration> {
    match value {
        serde_json::Value::Number(num) => num.as_u64().map(LicenseDuration::from_secs),
        serde_json::Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Derives a license duration from markers in the key text.
///
/// The key is split on `-` and each segment is checked:
/// - a segment containing `lifetime` means unlimited
/// - a segment of the form `<n><unit>` with unit `d`/`day`, `w`/`week`,
///   `m`/`mo`/`month`, `y`/`yr`/`year` (plurals allowed) means n units
///
/// The first matching segment wins. Keys without a marker are unlimited.
/// Matching is case-insensitive; the function never fails.
pub fn derive_duration(key: &str) -> LicenseDuration {
    for segment in key.split('-') {
        let segment = segment.trim().to_ascii_lowercase();
        if segment.contains("lifetime") {
            return LicenseDuration::Unlimited;
        }
        if let Some(secs) = parse_marker(&segment) {
            return LicenseDuration::from_secs(secs);
        }
    }
    LicenseDuration::Unlimited
}

fn parse_marker(segment: &str) -> Option<u64> {
    let digits_end = segment
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(segment.len());
    if digits_end == 0 || digits_end == segment.len() {
        return None;
    }
    let count: u64 = segment[..digits_end].parse().ok()?;
    let unit = match &segment[digits_end..] {
        "d" | "day" | "days" => SECS_PER_DAY,
        "w" | "wk" | "week" | "weeks" => SECS_PER_WEEK,
        "m" | "mo" | "month" | "months" => SECS_PER_MONTH,
        "y" | "yr" | "year" | "years" => SECS_PER_YEAR,
        _ => return None,
    };
    count.checked_mul(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(duration: LicenseDuration) -> u64 {
        match duration {
            LicenseDuration::Seconds(secs) => secs.get(),
            LicenseDuration::Unlimited => panic!("expected fixed duration"),
        }
    }

    #[test]
    fn month_marker() {
        assert_eq!(secs(derive_duration("Soryn-XXXX-1month")), 2_592_000);
        assert_eq!(secs(derive_duration("Soryn-XXXX-1m")), 2_592_000);
    }

    #[test]
    fn other_markers() {
        assert_eq!(secs(derive_duration("Soryn-ABCDE-1d")), SECS_PER_DAY);
        assert_eq!(secs(derive_duration("Soryn-ABCDE-1w")), SECS_PER_WEEK);
        assert_eq!(secs(derive_duration("Soryn-ABCDE-1y")), SECS_PER_YEAR);
        assert_eq!(secs(derive_duration("Soryn-ABCDE-3DAYS")), 3 * SECS_PER_DAY);
    }

    #[test]
    fn lifetime_and_missing_markers_are_unlimited() {
        assert!(derive_duration("Soryn-XXXX-lifetime").is_unlimited());
        assert!(derive_duration("Soryn-XXXX-LIFETIME").is_unlimited());
        assert!(derive_duration("Soryn-XXXX").is_unlimited());
        assert!(derive_duration("").is_unlimited());
    }

    #[test]
    fn random_key_segments_are_not_markers() {
        // "1D4F" looks like it starts with a day marker but has trailing noise
        assert!(derive_duration("Soryn-1D4F9-QQQQ").is_unlimited());
        assert!(derive_duration("Soryn-12345-ABCDE").is_unlimited());
    }

    #[test]
    fn deterministic() {
        let key = "Soryn-K3Y-1w";
        assert_eq!(derive_duration(key), derive_duration(key));
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(
            "unlimited".parse::<LicenseDuration>(),
            Ok(LicenseDuration::Unlimited)
        );
        assert_eq!(
            "86400".parse::<LicenseDuration>().map(|dur| dur.expiry_secs()),
            Ok(SECS_PER_DAY)
        );
        assert!("soon".parse::<LicenseDuration>().is_err());
        assert_eq!(LicenseDuration::Unlimited.to_string(), "unlimited");
        assert_eq!(LicenseDuration::from_secs(0), LicenseDuration::Unlimited);
        assert_eq!(
            LicenseDuration::Unlimited.expiry_secs(),
            UNLIMITED_EXPIRY_SECS
        );
    }

    #[test]
    fn serde_shapes() {
        let json = serde_json::to_string(&LicenseDuration::from_secs(60)).unwrap();
        assert_eq!(json, "60");
        let json = serde_json::to_string(&LicenseDuration::Unlimited).unwrap();
        assert_eq!(json, "\"unlimited\"");
        let parsed: LicenseDuration = serde_json::from_str("\"3600\"").unwrap();
        assert_eq!(parsed.expiry_secs(), 3600);
    }
}
