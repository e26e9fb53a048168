//! The telemetry cycle: resend what is queued, then observe every device.
//!
//! One cycle for one compost operation:
//!
//! 1. Log in to the activity log. Without it nothing can be delivered.
//! 2. Flush the outbox. Queued observations go before fresh ones.
//! 3. Log in to the telemetry platform. Without it no device can be read.
//! 4. For each device: fetch the UTC day's samples, find its asset, and per
//!    key summarize, build and deliver. An observation that cannot be
//!    delivered is queued in the outbox.
//! 5. Log out of the telemetry platform, however the cycle ended.
//!
//! Devices are isolated from each other: a device whose telemetry cannot be
//! read is logged and skipped. Storage errors are not isolated; they end
//! the cycle, and no further device is started after one.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use jiff::{Timestamp, tz::TimeZone};

use crate::{
    client::{ActivityLog, ClientError, TelemetrySource},
    model::{Category, DeviceSpec, NewObservation, Series, Summary, TimeWindow},
    observation::ObservationBuilder,
    recommend::{self, CompostStatus, DailyStats, PileConditions, RecommendationSettings},
    retry,
    storage::{Storage, StorageError},
};

/// Errors that end a cycle early.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("activity log login failed: {0}")]
    ActivityLogAuth(#[source] ClientError),

    #[error("telemetry login failed: {0}")]
    TelemetryAuth(#[source] ClientError),

    #[error("a cycle for operation {0} is already running")]
    AlreadyRunning(String),

    #[error("failed to publish recommendation: {0}")]
    Publish(#[source] ClientError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// What a completed cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Queued observations delivered by the outbox flush.
    pub resent: usize,
    /// Fresh observations delivered immediately.
    pub sent: usize,
    /// Fresh observations queued in the outbox.
    pub queued: usize,
    pub devices_processed: usize,
    /// Devices without a linked asset.
    pub devices_skipped: usize,
    /// Devices whose telemetry could not be read.
    pub devices_failed: usize,
}

#[derive(Debug)]
enum DeviceOutcome {
    Processed { sent: usize, queued: usize },
    NoAsset,
    Failed,
}

/// Tokens and bounds shared by every device in a cycle.
struct CycleContext<'c> {
    operation_id: &'c str,
    activity_token: &'c str,
    telemetry_token: &'c str,
    window: TimeWindow,
}

/// A telemetry platform session, closed on drop.
struct Session<'a> {
    telemetry: &'a dyn TelemetrySource,
    token: String,
}

impl<'a> Session<'a> {
    fn open(telemetry: &'a dyn TelemetrySource) -> Result<Self, ClientError> {
        let token = telemetry.authenticate()?;
        Ok(Self { telemetry, token })
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.telemetry.invalidate_session(&self.token);
    }
}

/// Marks an operation as having a cycle in flight until dropped.
pub struct OperationClaim<'a> {
    running: &'a Mutex<HashSet<String>>,
    operation_id: String,
}

impl Drop for OperationClaim<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.operation_id);
    }
}

/// Runs cycles and recommendation passes against a set of devices.
pub struct Orchestrator<'a> {
    storage: &'a Storage,
    telemetry: &'a dyn TelemetrySource,
    activity_log: &'a dyn ActivityLog,
    builder: ObservationBuilder,
    devices: Vec<DeviceSpec>,
    workers: usize,
    recommendation: RecommendationSettings,
    running: Mutex<HashSet<String>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        storage: &'a Storage,
        telemetry: &'a dyn TelemetrySource,
        activity_log: &'a dyn ActivityLog,
        builder: ObservationBuilder,
        devices: Vec<DeviceSpec>,
    ) -> Self {
        Self {
            storage,
            telemetry,
            activity_log,
            builder,
            devices,
            workers: 1,
            recommendation: RecommendationSettings::default(),
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Processes up to `workers` devices at a time. Zero is treated as one.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_recommendation(mut self, settings: RecommendationSettings) -> Self {
        self.recommendation = settings;
        self
    }

    pub fn activity_log(&self) -> &dyn ActivityLog {
        self.activity_log
    }

    pub fn storage(&self) -> &Storage {
        self.storage
    }

    /// Claims `operation_id` for one cycle. Fails if a cycle already holds it.
    pub fn claim(&self, operation_id: &str) -> Result<OperationClaim<'_>, CycleError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(operation_id.to_string()) {
            return Err(CycleError::AlreadyRunning(operation_id.to_string()));
        }
        Ok(OperationClaim {
            running: &self.running,
            operation_id: operation_id.to_string(),
        })
    }

    /// Runs one cycle, logging in to the activity log first.
    pub fn run_cycle(&self, operation_id: &str) -> Result<CycleReport, CycleError> {
        let token = self.activity_log.authenticate().map_err(|e| {
            tracing::error!(error = %e, "activity log login failed, skipping cycle");
            CycleError::ActivityLogAuth(e)
        })?;
        self.run_cycle_with_token(operation_id, &token)
    }

    /// Runs one cycle with an activity-log token already in hand.
    pub fn run_cycle_with_token(
        &self,
        operation_id: &str,
        activity_token: &str,
    ) -> Result<CycleReport, CycleError> {
        let _claim = self.claim(operation_id)?;
        tracing::info!(operation_id, "running telemetry cycle");

        let resent = retry::flush(
            self.storage,
            &self.builder,
            self.activity_log,
            activity_token,
        )?;

        let session = Session::open(self.telemetry).map_err(|e| {
            tracing::error!(error = %e, "telemetry login failed, skipping devices");
            CycleError::TelemetryAuth(e)
        })?;

        let ctx = CycleContext {
            operation_id,
            activity_token,
            telemetry_token: &session.token,
            window: TimeWindow::utc_day(Timestamp::now()),
        };

        let mut report = CycleReport {
            resent,
            ..CycleReport::default()
        };
        for outcome in self.process_devices(&ctx)? {
            match outcome {
                DeviceOutcome::Processed { sent, queued } => {
                    report.devices_processed += 1;
                    report.sent += sent;
                    report.queued += queued;
                }
                DeviceOutcome::NoAsset => report.devices_skipped += 1,
                DeviceOutcome::Failed => report.devices_failed += 1,
            }
        }

        tracing::info!(
            operation_id,
            resent = report.resent,
            sent = report.sent,
            queued = report.queued,
            failed_devices = report.devices_failed,
            "telemetry cycle complete"
        );
        Ok(report)
    }

    /// Processes every device, in configuration order, on the worker pool.
    ///
    /// Stops at the first storage error. Devices already in flight on other
    /// workers finish, but none is started after it.
    fn process_devices(
        &self,
        ctx: &CycleContext<'_>,
    ) -> Result<Vec<DeviceOutcome>, StorageError> {
        if self.workers == 1 || self.devices.len() <= 1 {
            return self
                .devices
                .iter()
                .map(|device| self.process_device(ctx, device))
                .collect();
        }

        let next = AtomicUsize::new(0);
        let stopped = AtomicBool::new(false);
        let results = Mutex::new(Vec::with_capacity(self.devices.len()));
        thread::scope(|scope| {
            for _ in 0..self.workers.min(self.devices.len()) {
                scope.spawn(|| {
                    while !stopped.load(Ordering::SeqCst) {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(device) = self.devices.get(index) else {
                            break;
                        };
                        let outcome = self.process_device(ctx, device);
                        if outcome.is_err() {
                            stopped.store(true, Ordering::SeqCst);
                        }
                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((index, outcome));
                    }
                });
            }
        });

        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }

    fn process_device(
        &self,
        ctx: &CycleContext<'_>,
        device: &DeviceSpec,
    ) -> Result<DeviceOutcome, StorageError> {
        let series = match self.telemetry.fetch_series(
            ctx.telemetry_token,
            &device.id,
            &device.keys,
            ctx.window,
        ) {
            Ok(series) => series,
            Err(e) => {
                tracing::error!(device = %device.name, error = %e, "failed to fetch telemetry");
                return Ok(DeviceOutcome::Failed);
            }
        };

        let asset = match self.telemetry.resolve_asset(ctx.telemetry_token, &device.id) {
            Ok(Some(asset)) => asset,
            Ok(None) => {
                tracing::warn!(device = %device.name, "no asset linked, skipping device");
                return Ok(DeviceOutcome::NoAsset);
            }
            Err(e) => {
                tracing::error!(device = %device.name, error = %e, "failed to resolve asset");
                return Ok(DeviceOutcome::Failed);
            }
        };

        let mut sent = 0;
        let mut queued = 0;
        for key in &device.keys {
            let Some(summary) = Summary::of(&numeric_values(&series, key)) else {
                tracing::debug!(device = %device.name, key = %key, "no numeric samples");
                continue;
            };
            if self.builder.classify(key).is_none() {
                tracing::warn!(device = %device.name, key = %key, "unclassified variable");
            }

            let payload = self.builder.build(key, &summary, None);
            match self
                .activity_log
                .post_observation(ctx.activity_token, ctx.operation_id, &payload)
            {
                Ok(()) => {
                    sent += 1;
                    tracing::info!(device = %device.name, key = %key, "Sent");
                }
                Err(e) => {
                    let id = self.storage.insert_unsent(&NewObservation {
                        device_id: device.id.clone(),
                        device_name: device.name.clone(),
                        asset_id: asset.id.clone(),
                        operation_id: ctx.operation_id.to_string(),
                        variable: key.clone(),
                        summary,
                        phenomenon_time: payload.phenomenon_time,
                    })?;
                    queued += 1;
                    tracing::info!(
                        device = %device.name,
                        key = %key,
                        record_id = id,
                        error = %e,
                        "Stored unsent"
                    );
                }
            }
        }

        Ok(DeviceOutcome::Processed { sent, queued })
    }

    /// Assesses the piles from today's telemetry and publishes the verdict
    /// to the first linked asset.
    ///
    /// Returns `None` when there is no asset or temperature and moisture
    /// are not both measured.
    pub fn run_recommendation_pass(&self) -> Result<Option<CompostStatus>, CycleError> {
        let session = Session::open(self.telemetry).map_err(CycleError::TelemetryAuth)?;
        let now = Timestamp::now();
        let window = TimeWindow::utc_day(now);

        let mut stats: HashMap<Category, DailyStats> = HashMap::new();
        let mut asset_id = None;
        for device in &self.devices {
            let fetched = self
                .telemetry
                .fetch_series(&session.token, &device.id, &device.keys, window);
            let series = match fetched {
                Ok(series) => series,
                Err(e) => {
                    tracing::warn!(device = %device.name, error = %e, "failed to fetch telemetry");
                    continue;
                }
            };
            match self.telemetry.resolve_asset(&session.token, &device.id) {
                Ok(Some(asset)) => {
                    asset_id.get_or_insert(asset.id);
                }
                Ok(None) => {
                    tracing::warn!(device = %device.name, "no asset linked, skipping device");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(device = %device.name, error = %e, "failed to resolve asset");
                    continue;
                }
            }

            for key in &device.keys {
                let (Some(category), Some(daily)) = (
                    self.builder.classify(key),
                    DailyStats::of(&numeric_values(&series, key)),
                ) else {
                    continue;
                };
                stats.entry(category).or_insert(daily);
            }
        }

        let Some(asset_id) = asset_id else {
            tracing::warn!("no device linked to an asset, no recommendation");
            return Ok(None);
        };
        let (Some(&temperature), Some(&moisture)) = (
            stats.get(&Category::Temperature),
            stats.get(&Category::Moisture),
        ) else {
            tracing::warn!("temperature and moisture are both needed for a recommendation");
            return Ok(None);
        };

        let conditions = PileConditions {
            temperature,
            moisture,
            acidity: stats.get(&Category::Acidity).copied(),
        };
        let today = now.to_zoned(TimeZone::UTC).date();
        let status = recommend::analyze(
            &conditions,
            self.recommendation.age_days(today),
            &self.recommendation,
        );

        self.telemetry
            .publish_recommendation(&session.token, &asset_id, &status)
            .map_err(CycleError::Publish)?;
        tracing::info!(asset = %asset_id, phase = ?status.phase, "published recommendation");
        Ok(Some(status))
    }
}

/// The numeric samples of `key`. Non-numeric samples are dropped.
fn numeric_values(series: &Series, key: &str) -> Vec<f64> {
    series
        .get(key)
        .map(|samples| samples.iter().filter_map(|s| s.numeric()).collect())
        .unwrap_or_default()
}
