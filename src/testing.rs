//! In-memory stand-ins for the external services, for tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use crate::{
    client::{ActivityLog, ClientError, TelemetrySource},
    model::{Asset, DeviceSpec, ObservationPayload, OperationWindow, Sample, Series, TimeWindow},
    observation::{ActivityTypes, ObservationBuilder, Vocabulary},
    recommend::CompostStatus,
};

pub fn test_builder() -> ObservationBuilder {
    ObservationBuilder::new(
        Vocabulary::default(),
        ActivityTypes {
            temperature: "temp-type".into(),
            moisture: "moisture-type".into(),
            acidity: "ph-type".into(),
        },
    )
}

pub fn device(id: &str, keys: &[&str]) -> DeviceSpec {
    DeviceSpec {
        id: id.into(),
        name: format!("{id} probe"),
        keys: keys.iter().map(|k| (*k).to_string()).collect(),
    }
}

fn unavailable(what: &str) -> ClientError {
    ClientError::Unexpected(format!("{what} unavailable"))
}

/// Activity log that accepts or rejects everything, switchable at runtime.
pub struct FakeActivityLog {
    up: AtomicBool,
    auth_ok: bool,
    rejected_operations: HashSet<String>,
    operations: HashMap<String, OperationWindow>,
    attempts: AtomicUsize,
    posted: Mutex<Vec<(String, ObservationPayload)>>,
}

impl FakeActivityLog {
    pub fn up() -> Self {
        Self {
            up: AtomicBool::new(true),
            auth_ok: true,
            rejected_operations: HashSet::new(),
            operations: HashMap::new(),
            attempts: AtomicUsize::new(0),
            posted: Mutex::new(Vec::new()),
        }
    }

    pub fn down() -> Self {
        let log = Self::up();
        log.set_up(false);
        log
    }

    pub fn auth_failing(mut self) -> Self {
        self.auth_ok = false;
        self
    }

    pub fn rejecting_operation(mut self, operation_id: &str) -> Self {
        self.rejected_operations.insert(operation_id.to_string());
        self
    }

    pub fn with_operation(mut self, window: OperationWindow) -> Self {
        self.operations.insert(window.pile_name.clone(), window);
        self
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    /// Every `post_observation` call, delivered or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successfully delivered payloads with their operation IDs.
    pub fn posted(&self) -> Vec<(String, ObservationPayload)> {
        self.posted.lock().unwrap().clone()
    }
}

impl ActivityLog for FakeActivityLog {
    fn authenticate(&self) -> Result<String, ClientError> {
        if self.auth_ok {
            Ok("fc-token".into())
        } else {
            Err(ClientError::MissingToken("fake activity log"))
        }
    }

    fn resolve_operation(
        &self,
        _token: &str,
        pile_name: &str,
    ) -> Result<Option<OperationWindow>, ClientError> {
        Ok(self.operations.get(pile_name).cloned())
    }

    fn post_observation(
        &self,
        _token: &str,
        operation_id: &str,
        payload: &ObservationPayload,
    ) -> Result<(), ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.up.load(Ordering::SeqCst) || self.rejected_operations.contains(operation_id) {
            return Err(unavailable("activity log"));
        }
        self.posted
            .lock()
            .unwrap()
            .push((operation_id.to_string(), payload.clone()));
        Ok(())
    }
}

struct FakeDevice {
    series: Option<Series>,
    asset: Option<Asset>,
}

/// Telemetry platform serving canned series per device.
pub struct FakeTelemetry {
    auth_ok: bool,
    devices: HashMap<String, FakeDevice>,
    logins: AtomicUsize,
    invalidated: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, CompostStatus)>>,
}

impl FakeTelemetry {
    pub fn new() -> Self {
        Self {
            auth_ok: true,
            devices: HashMap::new(),
            logins: AtomicUsize::new(0),
            invalidated: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn auth_failing(mut self) -> Self {
        self.auth_ok = false;
        self
    }

    /// A device linked to `asset` (if any) reporting `values` per key.
    pub fn with_device(
        mut self,
        device_id: &str,
        asset: Option<&str>,
        values: &[(&str, &[f64])],
    ) -> Self {
        let series = values
            .iter()
            .map(|(key, vs)| {
                let samples = vs
                    .iter()
                    .zip(0_i64..)
                    .map(|(v, ts)| Sample {
                        ts,
                        value: Some(serde_json::Value::String(v.to_string())),
                    })
                    .collect();
                ((*key).to_string(), samples)
            })
            .collect();
        self.devices.insert(
            device_id.to_string(),
            FakeDevice {
                series: Some(series),
                asset: asset.map(|id| Asset {
                    id: id.to_string(),
                    entity_type: "ASSET".into(),
                }),
            },
        );
        self
    }

    /// A device whose telemetry fetch always fails.
    pub fn with_failing_device(mut self, device_id: &str) -> Self {
        self.devices.insert(
            device_id.to_string(),
            FakeDevice {
                series: None,
                asset: None,
            },
        );
        self
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, CompostStatus)> {
        self.published.lock().unwrap().clone()
    }
}

impl TelemetrySource for FakeTelemetry {
    fn authenticate(&self) -> Result<String, ClientError> {
        if !self.auth_ok {
            return Err(ClientError::MissingToken("fake telemetry"));
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(format!("tb-token-{n}"))
    }

    fn fetch_series(
        &self,
        _token: &str,
        device_id: &str,
        _keys: &[String],
        _window: TimeWindow,
    ) -> Result<Series, ClientError> {
        self.devices
            .get(device_id)
            .and_then(|d| d.series.clone())
            .ok_or_else(|| unavailable("telemetry"))
    }

    fn resolve_asset(&self, _token: &str, device_id: &str) -> Result<Option<Asset>, ClientError> {
        Ok(self.devices.get(device_id).and_then(|d| d.asset.clone()))
    }

    fn invalidate_session(&self, token: &str) {
        self.invalidated.lock().unwrap().push(token.to_string());
    }

    fn publish_recommendation(
        &self,
        _token: &str,
        asset_id: &str,
        status: &CompostStatus,
    ) -> Result<(), ClientError> {
        self.published
            .lock()
            .unwrap()
            .push((asset_id.to_string(), status.clone()));
        Ok(())
    }
}
