//! Runtime settings recognised by the monitoring core.
//!
//! Settings are persisted as `(key, value)` strings; this module is the only
//! place that knows which keys exist and how their values are validated.
//!
//! | key                 | value                          | effect                              |
//! |---------------------|--------------------------------|-------------------------------------|
//! | `latency_threshold` | non-negative integer, millis   | `up`/`degraded` boundary, next tick |

use serde::{Deserialize, Serialize};

use crate::error::UptimeError;

pub const LATENCY_THRESHOLD_KEY: &str = "latency_threshold";

/// Default boundary between `up` and `degraded`
pub const DEFAULT_LATENCY_THRESHOLD_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    /// Milliseconds at or above which a successful probe is `degraded`
    LatencyThreshold(u64),
}

impl Setting {
    pub fn key(&self) -> &'static str {
        match self {
            Setting::LatencyThreshold(_) => LATENCY_THRESHOLD_KEY,
        }
    }

    /// Value as persisted
    pub fn value(&self) -> String {
        match self {
            Setting::LatencyThreshold(ms) => ms.to_string(),
        }
    }

    /// Parse and validate a raw key/value pair
    pub fn parse(key: &str, value: &str) -> Result<Self, UptimeError> {
        let invalid = |reason: String| UptimeError::InvalidSetting { key: key.to_string(), reason };

        match key {
            LATENCY_THRESHOLD_KEY => value
                .trim()
                .parse::<u64>()
                .map(Setting::LatencyThreshold)
                .map_err(|_| invalid(format!("expected non-negative integer milliseconds, got {value:?}"))),
            _ => Err(invalid("unknown setting".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latency_threshold() {
        assert_eq!(Setting::parse("latency_threshold", "250").unwrap(), Setting::LatencyThreshold(250));
        assert_eq!(Setting::parse("latency_threshold", " 0 ").unwrap(), Setting::LatencyThreshold(0));

        assert!(Setting::parse("latency_threshold", "-1").is_err());
        assert!(Setting::parse("latency_threshold", "fast").is_err());
        assert!(Setting::parse("latency_threshold", "1.5").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Setting::parse("theme", "dark").unwrap_err();
        assert!(matches!(err, UptimeError::InvalidSetting { ref key, .. } if key == "theme"));
    }

    #[test]
    fn test_round_trip_through_store_format() {
        let setting = Setting::LatencyThreshold(1500);
        assert_eq!(Setting::parse(setting.key(), &setting.value()).unwrap(), setting);
    }
}
