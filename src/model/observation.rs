//! Observations: aggregated statistics on their way to the activity log.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// The semantic category of a measured variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Temperature,
    Moisture,
    Acidity,
}

/// Statistical summary of a variable's samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Summary {
    /// Summarizes a set of values. Returns `None` when there are none.
    #[allow(clippy::cast_precision_loss)]
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self {
            mean,
            min: Some(min),
            max: Some(max),
        })
    }
}

/// Observation time: UTC, truncated to the minute (`2025-06-01T23:00Z`).
///
/// Kept as its formatted text so a stored observation resubmits exactly
/// the time it was first built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationTime(String);

impl ObservationTime {
    /// The current minute.
    pub fn now() -> Self {
        Self::at(Timestamp::now())
    }

    /// The minute containing `ts`.
    pub fn at(ts: Timestamp) -> Self {
        Self(ts.strftime("%Y-%m-%dT%H:%MZ").to_string())
    }

    /// Wraps a time previously produced by [`ObservationTime::as_str`].
    pub fn from_stored(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The wire payload posted to the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationPayload {
    #[serde(rename = "@type")]
    pub kind: String,

    pub observed_property: String,

    pub activity_type: String,

    pub phenomenon_time: ObservationTime,

    /// Range text, e.g. `MIN: 20 to MAX: 24`. Absent without min/max.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    pub has_result: QuantityValue,
}

/// A measured value with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityValue {
    #[serde(rename = "@type")]
    pub kind: String,

    pub has_value: f64,

    pub unit: String,
}

/// An observation about to be queued in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub device_id: String,
    pub device_name: String,
    pub asset_id: String,
    pub operation_id: String,
    /// The raw telemetry key, e.g. `data_TEMP_SOIL`.
    pub variable: String,
    pub summary: Summary,
    pub phenomenon_time: ObservationTime,
}

/// An observation held in the outbox.
///
/// Immutable apart from `sent`, which only ever goes from false to true.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub id: i64,
    pub device_id: String,
    pub device_name: String,
    pub asset_id: String,
    pub operation_id: String,
    pub variable: String,
    pub summary: Summary,
    pub phenomenon_time: ObservationTime,
    pub sent: bool,
}
