//! Core data model for pilewatch.
//!
//! Devices and their telemetry come in, observations go out. Anything that
//! could not be delivered is kept as an [`ObservationRecord`] until it is.

mod device;
mod observation;
mod operation;
mod telemetry;

pub use device::DeviceSpec;
pub use observation::{
    Category, NewObservation, ObservationPayload, ObservationRecord, ObservationTime,
    QuantityValue, Summary,
};
pub use operation::OperationWindow;
pub use telemetry::{Asset, Sample, Series, TimeWindow};
