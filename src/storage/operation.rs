//! Operation-window storage: the compost operations registered for scheduling.

use rusqlite::params;

use crate::model::OperationWindow;

use super::{Result, Storage};

impl Storage {
    /// Records an operation window keyed on its operation ID.
    ///
    /// First write wins: a second registration of the same operation is
    /// ignored. Returns whether a row was inserted.
    pub fn register_operation_window(&self, window: &OperationWindow) -> Result<bool> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO operation_windows (operation_id, pile_name, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &window.operation_id,
                &window.pile_name,
                window.start.as_deref(),
                window.end.as_deref(),
            ],
        )?;
        Ok(rows == 1)
    }

    /// Lists all registered operation windows in registration order.
    pub fn list_operation_windows(&self) -> Result<Vec<OperationWindow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT operation_id, pile_name, start_date, end_date
             FROM operation_windows ORDER BY id",
        )?;
        let windows = stmt
            .query_map([], |row| {
                Ok(OperationWindow {
                    operation_id: row.get(0)?,
                    pile_name: row.get(1)?,
                    start: row.get(2)?,
                    end: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(windows)
    }
}
