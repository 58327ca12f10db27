//! SQLite-backed employee directory and attendance ledger.

use base64::Engine as _;
use chrono::NaiveDateTime;
use ponto_core::{DirectoryEntry, ValidatedEnrollment};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Second-precision local timestamp format used for attendance events.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS employees (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        registration_number TEXT NOT NULL,
        organization_id INTEGER NOT NULL,
        national_id TEXT NOT NULL,
        fingerprint TEXT,
        portrait BLOB NOT NULL,
        portrait_base64 TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS attendance_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recorded_at TEXT NOT NULL,
        employee_id INTEGER NOT NULL,
        sync_flag INTEGER NOT NULL DEFAULT 0
    );
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Read side of the roster plus the enrollment insert.
pub trait EmployeeDirectory: Send + Sync {
    /// Every employee row, unordered, fingerprints in stored text form.
    fn scan_all(&self) -> Result<Vec<DirectoryEntry>, StoreError>;

    /// Insert one employee atomically, returning the new id.
    fn insert(&self, employee: &NewEmployee) -> Result<i64, StoreError>;
}

/// Append-only attendance record.
pub trait AttendanceLedger: Send + Sync {
    /// Record one pending (`sync_flag = 0`) event, returning its id.
    fn append(&self, timestamp: NaiveDateTime, employee_id: i64) -> Result<i64, StoreError>;
}

/// A validated enrollment plus the portrait captured with it.
#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub enrollment: ValidatedEnrollment,
    /// JPEG bytes of the face crop.
    pub portrait: Vec<u8>,
}

/// An attendance event not yet synchronized upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEvent {
    pub id: i64,
    pub recorded_at: String,
    pub employee_id: i64,
    /// `None` when the employee row no longer exists.
    pub name: Option<String>,
    pub registration_number: Option<String>,
}

/// Single-connection SQLite store implementing both collaborators.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and bootstrap the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened database");
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Events with `sync_flag = 0`, oldest first, joined with employee details.
    pub fn pending_events(&self) -> Result<Vec<PendingEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.recorded_at, e.employee_id, m.name, m.registration_number
             FROM attendance_events e
             LEFT JOIN employees m ON m.id = e.employee_id
             WHERE e.sync_flag = 0
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingEvent {
                id: row.get(0)?,
                recorded_at: row.get(1)?,
                employee_id: row.get(2)?,
                name: row.get(3)?,
                registration_number: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Flip the given pending events to synced in one transaction.
    /// Returns how many rows changed; unknown or already-synced ids are ignored.
    pub fn mark_synced(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE attendance_events SET sync_flag = 1 WHERE id = ?1 AND sync_flag = 0")?;
            for id in ids {
                changed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        tracing::info!(requested = ids.len(), changed, "marked events synced");
        Ok(changed)
    }

    pub fn employee_count(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM employees", [], |row| row.get(0))?)
    }
}

impl EmployeeDirectory for SqliteStore {
    fn scan_all(&self) -> Result<Vec<DirectoryEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT id, name, registration_number, fingerprint, portrait FROM employees")?;
        let rows = stmt.query_map([], |row| {
            Ok(DirectoryEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                registration_number: row.get(2)?,
                fingerprint_hex: row.get(3)?,
                portrait: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert(&self, employee: &NewEmployee) -> Result<i64, StoreError> {
        let e = &employee.enrollment;
        let portrait_b64 = base64::engine::general_purpose::STANDARD.encode(&employee.portrait);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO employees
             (name, registration_number, organization_id, national_id, fingerprint, portrait, portrait_base64)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                e.name,
                e.registration_number,
                e.organization_id,
                e.national_id,
                e.fingerprint.to_hex(),
                employee.portrait,
                portrait_b64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(employee = id, registration = %e.registration_number, "employee enrolled");
        Ok(id)
    }
}

impl AttendanceLedger for SqliteStore {
    fn append(&self, timestamp: NaiveDateTime, employee_id: i64) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO attendance_events (recorded_at, employee_id, sync_flag) VALUES (?1, ?2, 0)",
            params![timestamp.format(TIMESTAMP_FORMAT).to_string(), employee_id],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(event = id, employee = employee_id, "attendance recorded");
        Ok(id)
    }
}
