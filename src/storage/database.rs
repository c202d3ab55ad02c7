//! SQLite connection management.
//!
//! There is no long-lived shared connection: each logical operation opens
//! a connection, runs its transaction, and releases it. Write-ahead
//! logging keeps readers and writers from blocking each other, and a busy
//! timeout bounds how long an operation waits on a competing writer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use crate::config::Paths;
use crate::error::StoreError;

use super::migrations;

/// How long a connection waits on a locked store before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded backoff for `StorageBusy` failures: 3 attempts, 50ms base,
/// doubling per attempt. Tunables, not hard requirements.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Handle to the store file. Cheap to clone; opens per-operation
/// connections on demand.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open the store at the default location.
    ///
    /// Creates the database file, runs schema migrations, and verifies
    /// integrity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, migrated, or fails
    /// its integrity check beyond repair.
    pub fn open(paths: &Paths) -> Result<Self, StoreError> {
        paths.ensure_dirs()?;
        Self::open_at(&paths.database)
    }

    /// Open the store at a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, migrated, or fails
    /// its integrity check beyond repair.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let db = Self {
            path: path.to_path_buf(),
        };

        let conn = db.connect()?;
        db.verify_integrity(&conn)?;
        migrations::run(&conn)?;

        Ok(db)
    }

    /// Path to the underlying store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current schema version of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        let conn = self.connect()?;
        migrations::get_version(&conn)
    }

    /// Flush and truncate the write-ahead log into the main store file.
    ///
    /// Run before copying or renaming the store file so the `-wal` side
    /// file holds no unmerged pages.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot run.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(|e| StoreError::Database(format!("Failed to checkpoint store: {e}")))?;
        Ok(())
    }

    /// Run a read-only operation on a fresh connection.
    ///
    /// Retries with bounded backoff if the store is momentarily locked.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `StorageBusy` once retries are
    /// exhausted.
    pub fn read<T>(
        &self,
        op: impl Fn(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.with_retry(|| {
            let conn = self.connect()?;
            op(&conn)
        })
    }

    /// Run a mutating operation inside an explicit transaction.
    ///
    /// The transaction commits on success and rolls back on any error,
    /// leaving the store in its prior consistent state. Partial writes
    /// are never observable.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `StorageBusy` once retries are
    /// exhausted.
    pub fn write<T>(
        &self,
        op: impl Fn(&Transaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.with_retry(|| {
            let mut conn = self.connect()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StoreError::from)?;
            let value = op(&tx)?;
            tx.commit().map_err(StoreError::from)?;
            Ok(value)
        })
    }

    /// Open and configure a short-lived connection.
    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path).map_err(|e| {
            StoreError::Database(format!(
                "Failed to open database {}: {e}",
                self.path.display()
            ))
        })?;

        conn.busy_timeout(BUSY_TIMEOUT).map_err(StoreError::from)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| StoreError::Database(format!("Failed to configure connection: {e}")))?;

        Ok(conn)
    }

    /// Retry `op` while it fails with `StorageBusy`, backing off
    /// exponentially, then surface the last error.
    fn with_retry<T>(&self, op: impl Fn() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut delay = RETRY_BASE_DELAY;

        for attempt in 1..=RETRY_ATTEMPTS {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < RETRY_ATTEMPTS => {
                    warn!(attempt, ?delay, "store busy, retrying");
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("retry loop always returns")
    }

    /// Verify store integrity, attempting a reindex before giving up.
    fn verify_integrity(&self, conn: &Connection) -> Result<(), StoreError> {
        if Self::integrity_ok(conn)? {
            return Ok(());
        }

        warn!(path = %self.path.display(), "integrity check failed, attempting repair");
        conn.execute_batch("REINDEX;")
            .map_err(|e| Self::integrity_error(&self.path, &e.to_string()))?;

        if Self::integrity_ok(conn)? {
            debug!("integrity restored by reindex");
            return Ok(());
        }

        Err(Self::integrity_error(&self.path, "corruption persists after repair"))
    }

    fn integrity_ok(conn: &Connection) -> Result<bool, StoreError> {
        let verdict: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|e| StoreError::Database(format!("Failed to run integrity check: {e}")))?;
        Ok(verdict == "ok")
    }

    fn integrity_error(path: &Path, detail: &str) -> StoreError {
        StoreError::IntegrityCheckFailed(format!(
            "store {} is corrupt ({detail}); restore from the backup directory",
            path.display()
        ))
    }
}
