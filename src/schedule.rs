//! Job scheduling: one daily telemetry cycle per pile, and a periodic
//! recommendation pass.
//!
//! The registry is an ordinary value owned by whoever runs the loop. Jobs
//! run one at a time, so cycles never overlap.

use std::{collections::BTreeMap, fmt, str::FromStr, thread, time::Duration};

use jiff::{SignedDuration, Timestamp};
use serde::Deserialize;

use crate::{
    client::ClientError,
    cycle::Orchestrator,
    model::{OperationWindow, TimeWindow},
    storage::StorageError,
};

/// Errors from registering a pile.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("failed to look up the operation for pile {pile}: {source}")]
    Resolve {
        pile: String,
        #[source]
        source: ClientError,
    },

    #[error("no compost operation found for pile {0}")]
    UnknownPile(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A time of day, in UTC, at which daily jobs fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct DailyTrigger {
    hour: u8,
    minute: u8,
}

impl DailyTrigger {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// The first firing strictly after `after`.
    pub fn next_after(self, after: Timestamp) -> Timestamp {
        let day = TimeWindow::utc_day(after);
        let offset_ms = (i64::from(self.hour) * 60 + i64::from(self.minute)) * 60_000;
        let mut fire = day.start_ms + offset_ms;
        if fire <= after.as_millisecond() {
            fire = day.end_ms + offset_ms;
        }
        Timestamp::from_millisecond(fire).unwrap_or(Timestamp::MAX)
    }
}

impl Default for DailyTrigger {
    fn default() -> Self {
        Self {
            hour: 23,
            minute: 0,
        }
    }
}

impl FromStr for DailyTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid time of day {s:?}, expected HH:MM");
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for DailyTrigger {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for DailyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// A telemetry cycle for the pile's compost operation.
    Observation(OperationWindow),
    /// A recommendation pass, repeated at this interval.
    Recommendation(SignedDuration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    /// `None` once the job can no longer fire.
    pub next_run: Option<Timestamp>,
}

/// The set of scheduled jobs, keyed by job ID.
pub struct JobRegistry {
    jobs: BTreeMap<String, Job>,
    trigger: DailyTrigger,
}

const RECOMMENDATION_JOB: &str = "recommendation";

impl JobRegistry {
    pub fn new(trigger: DailyTrigger) -> Self {
        Self {
            jobs: BTreeMap::new(),
            trigger,
        }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Looks up the pile's operation, records its window and schedules the
    /// pile's daily cycle. Registering a pile again replaces its job.
    pub fn register_pile(
        &mut self,
        orchestrator: &Orchestrator<'_>,
        token: &str,
        pile_name: &str,
        now: Timestamp,
    ) -> Result<&Job, RegistrationError> {
        let window = orchestrator
            .activity_log()
            .resolve_operation(token, pile_name)
            .map_err(|source| RegistrationError::Resolve {
                pile: pile_name.to_string(),
                source,
            })?
            .ok_or_else(|| RegistrationError::UnknownPile(pile_name.to_string()))?;

        if !orchestrator.storage().register_operation_window(&window)? {
            tracing::debug!(
                operation_id = %window.operation_id,
                "operation window already recorded"
            );
        }

        let next_run = self.next_in_window(&window, now);
        match next_run {
            Some(at) => tracing::info!(
                pile = pile_name,
                operation_id = %window.operation_id,
                next_run = %at,
                "scheduled daily cycle"
            ),
            None => tracing::warn!(
                pile = pile_name,
                operation_id = %window.operation_id,
                "operation window has ended, job will not fire"
            ),
        }

        let id = format!("obs_{pile_name}");
        let job = Job {
            id: id.clone(),
            kind: JobKind::Observation(window),
            next_run,
        };
        self.jobs.insert(id.clone(), job);
        Ok(&self.jobs[&id])
    }

    /// Schedules the recommendation pass every `interval`, first after one
    /// interval has passed.
    pub fn schedule_recommendations(&mut self, interval: SignedDuration, now: Timestamp) {
        let job = Job {
            id: RECOMMENDATION_JOB.to_string(),
            kind: JobKind::Recommendation(interval),
            next_run: Some(after_interval(now, interval)),
        };
        self.jobs.insert(job.id.clone(), job);
    }

    /// The earliest pending job.
    pub fn next_due(&self) -> Option<(&Job, Timestamp)> {
        self.jobs
            .values()
            .filter_map(|job| job.next_run.map(|at| (job, at)))
            .min_by_key(|(_, at)| *at)
    }

    /// Runs every job due at `now`, earliest first, and reschedules each.
    /// Returns how many jobs ran.
    pub fn run_due(&mut self, orchestrator: &Orchestrator<'_>, now: Timestamp) -> usize {
        let mut due: Vec<(Timestamp, String)> = self
            .jobs
            .values()
            .filter_map(|job| job.next_run.filter(|at| *at <= now).map(|at| (at, job.id.clone())))
            .collect();
        due.sort();

        for (_, id) in &due {
            let Some(job) = self.jobs.get(id) else {
                continue;
            };
            let next_run = match &job.kind {
                JobKind::Observation(window) => {
                    match orchestrator.run_cycle(&window.operation_id) {
                        Ok(report) => tracing::debug!(job = %id, ?report, "job finished"),
                        Err(e) => tracing::error!(job = %id, error = %e, "telemetry cycle failed"),
                    }
                    self.next_in_window(window, now)
                }
                JobKind::Recommendation(interval) => {
                    if let Err(e) = orchestrator.run_recommendation_pass() {
                        tracing::error!(job = %id, error = %e, "recommendation pass failed");
                    }
                    Some(after_interval(now, *interval))
                }
            };
            if let Some(job) = self.jobs.get_mut(id) {
                job.next_run = next_run;
            }
        }
        due.len()
    }

    /// Sleeps until each job is due and runs it. Returns once no job can
    /// fire again.
    pub fn run(&mut self, orchestrator: &Orchestrator<'_>) {
        loop {
            let Some((job, at)) = self.next_due() else {
                tracing::info!("no jobs left to run");
                return;
            };
            tracing::info!(job = %job.id, at = %at, "waiting for next job");

            let wait = at.duration_since(Timestamp::now());
            if let Ok(wait) = Duration::try_from(wait) {
                thread::sleep(wait);
            }
            self.run_due(orchestrator, Timestamp::now());
        }
    }

    /// The next daily firing after `now` that falls inside `window`.
    fn next_in_window(&self, window: &OperationWindow, now: Timestamp) -> Option<Timestamp> {
        let from = match window.starts_at() {
            Some(start) if start > now => start
                .checked_sub(SignedDuration::from_millis(1))
                .unwrap_or(start),
            _ => now,
        };
        let at = self.trigger.next_after(from);
        match window.ends_at() {
            Some(end) if at > end => None,
            _ => Some(at),
        }
    }
}

fn after_interval(now: Timestamp, interval: SignedDuration) -> Timestamp {
    now.checked_add(interval).unwrap_or(Timestamp::MAX)
}
