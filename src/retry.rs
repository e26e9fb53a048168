//! Outbox flushing: resend every queued observation, in order.
//!
//! A record is marked sent only after the activity log accepted it. A
//! failed resend leaves the record untouched for the next cycle and never
//! stops the remaining records from being tried.
//!
//! Flushes are serialized through [`Storage::lock_outbox`]: a second flush
//! waits and then sees only what the first one left unsent.

use crate::{
    client::ActivityLog,
    model::{ObservationPayload, ObservationRecord},
    observation::ObservationBuilder,
    storage::{Result, Storage},
};

/// Rebuilds the payload a queued record was first built as.
pub fn rebuild_payload(
    builder: &ObservationBuilder,
    record: &ObservationRecord,
) -> ObservationPayload {
    builder.build(
        &record.variable,
        &record.summary,
        Some(record.phenomenon_time.clone()),
    )
}

/// Attempts delivery of every unsent record. Returns how many were delivered.
///
/// Only storage errors are returned; delivery failures are logged and left
/// for the next flush.
pub fn flush(
    storage: &Storage,
    builder: &ObservationBuilder,
    activity_log: &dyn ActivityLog,
    token: &str,
) -> Result<usize> {
    let _flushing = storage.lock_outbox();
    let pending = storage.list_unsent()?;
    if pending.is_empty() {
        return Ok(0);
    }
    tracing::info!(pending = pending.len(), "resending queued observations");

    let mut delivered = 0;
    for record in &pending {
        let payload = rebuild_payload(builder, record);
        match activity_log.post_observation(token, &record.operation_id, &payload) {
            Ok(()) => {
                if storage.mark_sent(record.id)? {
                    delivered += 1;
                }
                tracing::info!(
                    record_id = record.id,
                    device = %record.device_name,
                    key = %record.variable,
                    "Resent"
                );
            }
            Err(e) => {
                tracing::warn!(
                    record_id = record.id,
                    device = %record.device_name,
                    key = %record.variable,
                    error = %e,
                    "resend failed, keeping queued"
                );
            }
        }
    }

    tracing::info!(
        delivered,
        remaining = pending.len() - delivered,
        "outbox flush complete"
    );
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::{
        model::{NewObservation, ObservationTime, Summary},
        testing::{FakeActivityLog, test_builder},
    };

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path().join("outbox.sqlite")).unwrap();
        (dir, storage)
    }

    fn queued(variable: &str, operation_id: &str) -> NewObservation {
        NewObservation {
            device_id: "dev-1".into(),
            device_name: "Pile A probe".into(),
            asset_id: "asset-1".into(),
            operation_id: operation_id.into(),
            variable: variable.into(),
            summary: Summary {
                mean: 22.0,
                min: Some(20.0),
                max: Some(24.0),
            },
            phenomenon_time: ObservationTime::from_stored("2025-06-01T23:00Z"),
        }
    }

    #[test]
    fn flush_empty_outbox() {
        let (_dir, storage) = test_storage();
        let log = FakeActivityLog::up();

        assert_eq!(flush(&storage, &test_builder(), &log, "t").unwrap(), 0);
        assert!(log.posted().is_empty());
    }

    #[test]
    fn flush_delivers_in_insertion_order_and_marks_sent() {
        let (_dir, storage) = test_storage();
        let mut ids = Vec::new();
        for mean in [3.0, 1.0, 2.0] {
            let mut obs = queued("TEMP", "op-1");
            obs.summary.mean = mean;
            ids.push(storage.insert_unsent(&obs).unwrap());
        }
        let log = FakeActivityLog::up();

        let delivered = flush(&storage, &test_builder(), &log, "t").unwrap();

        assert_eq!(delivered, 3);
        assert!(storage.list_unsent().unwrap().is_empty());
        for id in ids {
            assert!(storage.load_observation(id).unwrap().sent);
        }
        let order: Vec<f64> = log
            .posted()
            .iter()
            .map(|(_, p)| p.has_result.has_value)
            .collect();
        assert_eq!(order, [3.0, 1.0, 2.0]);
    }

    #[test]
    fn flush_targets_stored_operation() {
        let (_dir, storage) = test_storage();
        storage.insert_unsent(&queued("TEMP", "op-7")).unwrap();
        storage.insert_unsent(&queued("TEMP", "op-8")).unwrap();
        let log = FakeActivityLog::up();

        flush(&storage, &test_builder(), &log, "t").unwrap();

        let operations: Vec<String> = log.posted().into_iter().map(|(op, _)| op).collect();
        assert_eq!(operations, ["op-7", "op-8"]);
    }

    #[test]
    fn all_failures_return_zero_and_keep_records() {
        let (_dir, storage) = test_storage();
        storage.insert_unsent(&queued("a", "op-1")).unwrap();
        storage.insert_unsent(&queued("b", "op-1")).unwrap();
        let log = FakeActivityLog::down();

        assert_eq!(flush(&storage, &test_builder(), &log, "t").unwrap(), 0);

        let unsent = storage.list_unsent().unwrap();
        assert_eq!(unsent.len(), 2);
        assert!(unsent.iter().all(|r| !r.sent));
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let (_dir, storage) = test_storage();
        let first = storage.insert_unsent(&queued("a", "op-bad")).unwrap();
        let second = storage.insert_unsent(&queued("b", "op-1")).unwrap();
        let third = storage.insert_unsent(&queued("c", "op-1")).unwrap();
        let log = FakeActivityLog::up().rejecting_operation("op-bad");

        let delivered = flush(&storage, &test_builder(), &log, "t").unwrap();

        assert_eq!(delivered, 2);
        assert!(!storage.load_observation(first).unwrap().sent);
        assert!(storage.load_observation(second).unwrap().sent);
        assert!(storage.load_observation(third).unwrap().sent);
    }

    #[test]
    fn sent_flag_follows_delivery_outcomes() {
        let (_dir, storage) = test_storage();
        let id = storage.insert_unsent(&queued("TEMP", "op-1")).unwrap();
        let log = FakeActivityLog::down();
        let builder = test_builder();

        for up in [false, false, true, false, true] {
            log.set_up(up);
            flush(&storage, &builder, &log, "t").unwrap();
            let sent = storage.load_observation(id).unwrap().sent;
            // Once delivered, the record stays sent and is not resent.
            assert_eq!(sent, log.posted().len() == 1);
        }
        assert_eq!(log.posted().len(), 1);
    }

    #[test]
    fn rebuilt_payload_keeps_stored_time() {
        let (_dir, storage) = test_storage();
        let id = storage.insert_unsent(&queued("data_TEMP_SOIL", "op-1")).unwrap();
        let record = storage.load_observation(id).unwrap();

        let payload = rebuild_payload(&test_builder(), &record);

        assert_eq!(payload.phenomenon_time.as_str(), "2025-06-01T23:00Z");
        assert_eq!(payload.has_result.has_value, 22.0);
        assert_eq!(payload.details.as_deref(), Some("MIN: 20 to MAX: 24"));
    }

    #[test]
    fn resent_payload_matches_first_attempt() {
        let (_dir, storage) = test_storage();
        let builder = test_builder();
        let summary = Summary {
            mean: 41.5,
            min: Some(40.0),
            max: None,
        };
        let first = builder.build(
            "data_water_SOIL",
            &summary,
            Some(ObservationTime::from_stored("2025-06-02T08:15Z")),
        );
        storage
            .insert_unsent(&NewObservation {
                variable: "data_water_SOIL".into(),
                summary,
                phenomenon_time: first.phenomenon_time.clone(),
                ..queued("unused", "op-1")
            })
            .unwrap();
        let log = FakeActivityLog::up();

        flush(&storage, &builder, &log, "t").unwrap();

        assert_eq!(log.posted(), [("op-1".to_string(), first)]);
    }
}
