//! Durable ledger of processed content and the action log.
//!
//! Backed by a single SQLite file. All access goes through one
//! connection guarded by a `Mutex`, so the admission path (reads) and the
//! worker (writes) never touch the store concurrently through separate
//! handles. Cloning a `Ledger` is cheap and shares that connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use super::fingerprint::Fingerprint;
use crate::domain::{Action, ActionLogEntry, LedgerRecord};

/// Current schema version, stored in `PRAGMA user_version`
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed_files (
    hash TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    status TEXT NOT NULL,
    output_path TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS processing_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    action TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_processing_log_filename ON processing_log(filename);
";

/// Errors from ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i32, supported: i32 },

    #[error("Ledger lock poisoned")]
    LockPoisoned,

    #[error("Ledger is closed")]
    Closed,

    #[error("Ledger task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Handle to the ledger database
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open (or create) the ledger at `path`
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        // CLI readers (status, history) share the file with a running daemon
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        // FULL makes every commit durable before the call returns
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        Self::init_schema(&conn)?;

        tracing::debug!("Ledger opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// In-memory ledger for tests
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(LedgerError::UnsupportedSchema {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        Ok(())
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError>,
    {
        let guard = self.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let conn = guard.as_ref().ok_or(LedgerError::Closed)?;
        f(conn)
    }

    /// Run `f` on the blocking pool. Commits fsync under `synchronous=FULL`,
    /// so async callers go through here instead of stalling a runtime thread.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || f(&ledger)).await?
    }

    /// Has this content already been processed successfully?
    pub fn is_processed(&self, fingerprint: &Fingerprint) -> Result<bool, LedgerError> {
        self.with_conn(|conn| {
            let found: Option<i32> = conn
                .query_row(
                    "SELECT 1 FROM processed_files WHERE hash = ?1",
                    params![fingerprint.as_str()],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Record a successful completion. Re-processing the same content
    /// replaces the existing row.
    pub fn mark_processed(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
        output_path: &Path,
        status: &str,
    ) -> Result<(), LedgerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO processed_files (hash, filename, processed_at, status, output_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(hash) DO UPDATE SET
                    filename = excluded.filename,
                    processed_at = excluded.processed_at,
                    status = excluded.status,
                    output_path = excluded.output_path",
                params![
                    fingerprint.as_str(),
                    filename,
                    Utc::now().to_rfc3339(),
                    status,
                    output_path.to_string_lossy(),
                ],
            )?;
            Ok(())
        })
    }

    /// Append to the action log. Failures are reported, never returned:
    /// the audit trail must not undo the state change it describes.
    pub fn log_action(&self, filename: &str, action: Action, details: &str) {
        if let Err(e) = self.try_log_action(filename, action, details) {
            tracing::warn!("Failed to log action '{}' for {}: {}", action, filename, e);
        }
    }

    /// Append to the action log, surfacing errors
    pub fn try_log_action(
        &self,
        filename: &str,
        action: Action,
        details: &str,
    ) -> Result<(), LedgerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO processing_log (filename, action, timestamp, details)
                 VALUES (?1, ?2, ?3, ?4)",
                params![filename, action.as_str(), Utc::now().to_rfc3339(), details],
            )?;
            Ok(())
        })
    }

    /// Look up the record for a fingerprint
    pub fn record(&self, fingerprint: &Fingerprint) -> Result<Option<LedgerRecord>, LedgerError> {
        self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT hash, filename, processed_at, status, output_path
                     FROM processed_files WHERE hash = ?1",
                    params![fingerprint.as_str()],
                    record_from_row,
                )
                .optional()?;
            Ok(record)
        })
    }

    /// Number of distinct fingerprints processed
    pub fn processed_count(&self) -> Result<u64, LedgerError> {
        self.with_conn(|conn| {
            let count: u64 =
                conn.query_row("SELECT COUNT(*) FROM processed_files", [], |r| r.get(0))?;
            Ok(count)
        })
    }

    /// Most recent log entries, newest first
    pub fn recent_actions(&self, limit: usize) -> Result<Vec<ActionLogEntry>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, filename, action, timestamp, details
                 FROM processing_log ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// All log entries for a file name, oldest first
    pub fn actions_for(&self, filename: &str) -> Result<Vec<ActionLogEntry>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, filename, action, timestamp, details
                 FROM processing_log WHERE filename = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![filename], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Close the underlying connection. Clones see `LedgerError::Closed`
    /// afterwards.
    pub fn close(&self) -> Result<(), LedgerError> {
        let mut guard = self.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| LedgerError::Sqlite(e))?;
        }
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::warn!("Unparseable ledger timestamp '{}': {}", s, e);
            DateTime::<Utc>::default()
        })
}

fn record_from_row(row: &Row<'_>) -> Result<LedgerRecord, rusqlite::Error> {
    let processed_at: String = row.get("processed_at")?;
    Ok(LedgerRecord {
        fingerprint: row.get("hash")?,
        filename: row.get("filename")?,
        processed_at: parse_timestamp(&processed_at),
        status: row.get("status")?,
        output_path: row.get("output_path")?,
    })
}

fn entry_from_row(row: &Row<'_>) -> Result<ActionLogEntry, rusqlite::Error> {
    let timestamp: String = row.get("timestamp")?;
    Ok(ActionLogEntry {
        id: row.get("id")?,
        filename: row.get("filename")?,
        action: row.get("action")?,
        timestamp: parse_timestamp(&timestamp),
        details: row.get("details")?,
    })
}
