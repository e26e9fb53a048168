//! Telemetry as the platform returns it.

use std::collections::HashMap;

use jiff::Timestamp;
use serde::Deserialize;

const DAY_MS: i64 = 86_400_000;

/// Time-series values per key, each series in ascending time order.
pub type Series = HashMap<String, Vec<Sample>>;

/// A single telemetry sample.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    pub ts: i64,

    /// The raw value. The platform reports most values as strings.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl Sample {
    /// The sample's value as a finite number, if it is one.
    pub fn numeric(&self) -> Option<f64> {
        let value = match self.value.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }
}

/// An entity a device is linked to on the telemetry platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub entity_type: String,
}

/// A half-open time range `[start_ms, end_ms)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    /// The UTC day containing `at`: `[start-of-day, start-of-day + 24h)`.
    pub fn utc_day(at: Timestamp) -> Self {
        let start_ms = at.as_millisecond().div_euclid(DAY_MS) * DAY_MS;
        Self {
            start_ms,
            end_ms: start_ms + DAY_MS,
        }
    }
}
