//! Devices: the sensors polled every cycle.

use serde::Deserialize;

/// A monitored device, as listed in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceSpec {
    /// Device identifier on the telemetry platform.
    pub id: String,

    /// Display name used in logs and stored records.
    pub name: String,

    /// Measured-variable keys to poll, in order.
    pub keys: Vec<String>,
}
