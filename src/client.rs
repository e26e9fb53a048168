//! External services: the telemetry platform and the activity log.
//!
//! Each service is a trait so the pipeline can run against fakes. The real
//! implementations are blocking `reqwest` clients with a per-request
//! timeout and no retries of their own: the outbox is the retry mechanism.

mod farm_calendar;
mod thingsboard;

use std::time::Duration;

pub use farm_calendar::FarmCalendar;
pub use thingsboard::ThingsBoard;

use crate::{
    model::{Asset, ObservationPayload, OperationWindow, Series, TimeWindow},
    recommend::CompostStatus,
};

/// Errors from talking to an external service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}: login response carried no token")]
    MissingToken(&'static str),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// The telemetry platform devices report to.
pub trait TelemetrySource: Send + Sync {
    /// Logs in and returns a session token.
    fn authenticate(&self) -> Result<String, ClientError>;

    /// Fetches every key's samples for a device within `window`.
    fn fetch_series(
        &self,
        token: &str,
        device_id: &str,
        keys: &[String],
        window: TimeWindow,
    ) -> Result<Series, ClientError>;

    /// The asset a device is linked to, if any.
    fn resolve_asset(&self, token: &str, device_id: &str) -> Result<Option<Asset>, ClientError>;

    /// Ends a session. Failures are logged, never returned.
    fn invalidate_session(&self, token: &str);

    /// Attaches a compost status to an asset.
    fn publish_recommendation(
        &self,
        token: &str,
        asset_id: &str,
        status: &CompostStatus,
    ) -> Result<(), ClientError>;
}

/// The activity log observations are delivered to.
pub trait ActivityLog: Send + Sync {
    /// Logs in and returns a bearer token.
    fn authenticate(&self) -> Result<String, ClientError>;

    /// Finds the compost operation running on a pile.
    fn resolve_operation(
        &self,
        token: &str,
        pile_name: &str,
    ) -> Result<Option<OperationWindow>, ClientError>;

    /// Posts one observation to an operation. `Ok` means delivered.
    fn post_observation(
        &self,
        token: &str,
        operation_id: &str,
        payload: &ObservationPayload,
    ) -> Result<(), ClientError>;
}

/// Builds the blocking HTTP client shared by all requests of a service.
fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, ClientError> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?)
}
