//! Local persistence: the observation outbox and the operation-window cache.
//!
//! Everything lives in one `SQLite` file:
//!
//! ```text
//! observations        # Observations that could not be delivered (sent = 0)
//!                     # and those delivered later (sent = 1)
//! operation_windows   # Compost operations registered for scheduling
//! ```
//!
//! The connection sits behind a mutex, so writes are serialized. Callers
//! never hold it across a network call: every operation locks, runs one
//! statement and releases. Flushing the outbox does span network calls, so
//! it takes a separate lock that keeps two flushes from resending the same
//! record.

mod operation;
mod outbox;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rusqlite::Connection;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("observation not found: {0}")]
    ObservationNotFound(i64),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS observations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id TEXT NOT NULL,
        device_name TEXT NOT NULL,
        asset_id TEXT NOT NULL,
        operation_id TEXT NOT NULL,
        variable TEXT NOT NULL,
        mean_value REAL NOT NULL,
        min_value REAL,
        max_value REAL,
        date TEXT NOT NULL,
        sent INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS observations_unsent ON observations (sent, id);
    CREATE TABLE IF NOT EXISTS operation_windows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation_id TEXT NOT NULL UNIQUE,
        pile_name TEXT NOT NULL,
        start_date TEXT,
        end_date TEXT
    );
";

/// `SQLite`-backed storage for the outbox and the operation cache.
pub struct Storage {
    conn: Mutex<Connection>,
    flushing: Mutex<()>,
}

impl Storage {
    /// Opens (or creates) the database at `path` and ensures the schema.
    ///
    /// The parent directory is created if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            flushing: Mutex::new(()),
        })
    }

    /// Returns the default database path: `~/.pilewatch/outbox.sqlite`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pilewatch").join("outbox.sqlite"))
    }

    /// Locks the connection. A panic elsewhere doesn't invalidate `SQLite`
    /// state, so a poisoned lock is recovered.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Held for a whole outbox flush. Only one flush runs at a time.
    pub fn lock_outbox(&self) -> MutexGuard<'_, ()> {
        self.flushing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
