//! Outbox storage: observations awaiting delivery.
//!
//! A record is written once, when immediate delivery fails, and afterwards
//! only its `sent` flag changes, from 0 to 1, when a resend succeeds.

use rusqlite::{Row, params};

use crate::model::{NewObservation, ObservationRecord, ObservationTime, Summary};

use super::{Result, Storage, StorageError};

const RECORD_COLUMNS: &str = "id, device_id, device_name, asset_id, operation_id, variable, \
     mean_value, min_value, max_value, date, sent";

impl Storage {
    /// Queues an observation as unsent. Returns the assigned ID.
    pub fn insert_unsent(&self, observation: &NewObservation) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO observations (
                device_id, device_name, asset_id, operation_id,
                variable, mean_value, min_value, max_value, date, sent
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
            params![
                &observation.device_id,
                &observation.device_name,
                &observation.asset_id,
                &observation.operation_id,
                &observation.variable,
                observation.summary.mean,
                observation.summary.min,
                observation.summary.max,
                observation.phenomenon_time.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Lists all unsent observations in insertion order.
    pub fn list_unsent(&self) -> Result<Vec<ObservationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM observations WHERE sent = 0 ORDER BY id"
        ))?;
        let records = stmt
            .query_map([], read_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Number of unsent observations.
    pub fn count_unsent(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM observations WHERE sent = 0")
    }

    /// Number of observations ever queued, sent or not.
    pub fn count_observations(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM observations")
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(sql, [], |row| row.get(0))?;
        usize::try_from(count).map_err(|e| StorageError::Corrupt(format!("invalid count: {e}")))
    }

    /// Marks an observation as sent.
    ///
    /// Idempotent: returns `true` only for the call that flipped the flag.
    pub fn mark_sent(&self, id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE observations SET sent = 1 WHERE id = ?1 AND sent = 0",
            params![id],
        )?;
        Ok(rows == 1)
    }

    /// Loads a single observation, sent or not.
    pub fn load_observation(&self, id: i64) -> Result<ObservationRecord> {
        let conn = self.conn();
        let result = conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM observations WHERE id = ?1"),
            params![id],
            read_record,
        );
        match result {
            Ok(record) => Ok(record),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StorageError::ObservationNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<ObservationRecord> {
    Ok(ObservationRecord {
        id: row.get(0)?,
        device_id: row.get(1)?,
        device_name: row.get(2)?,
        asset_id: row.get(3)?,
        operation_id: row.get(4)?,
        variable: row.get(5)?,
        summary: Summary {
            mean: row.get(6)?,
            min: row.get(7)?,
            max: row.get(8)?,
        },
        phenomenon_time: ObservationTime::from_stored(row.get::<_, String>(9)?),
        sent: row.get::<_, i64>(10)? != 0,
    })
}
