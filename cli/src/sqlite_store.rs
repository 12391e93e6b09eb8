//! SQLite-backed `Storage`.
//!
//! Raw frames, last seen times, anomalies and cycle summaries live in one database file.
//! Statements are short and run inline on the calling task while holding the connection
//! lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use upmu_core::storage::{FrameId, RawFrame, Storage, StorageError};
use upmu_core::window::anomaly::{Anomaly, CycleSummary};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS received_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        serial_number TEXT NOT NULL,
        data BLOB NOT NULL,
        time_received TEXT NOT NULL,
        published INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_received_serial ON received_files(serial_number, time_received);
    CREATE TABLE IF NOT EXISTS latest_time (
        serial_number TEXT PRIMARY KEY,
        time_received TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS warnings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        serial_number TEXT NOT NULL,
        warning_type TEXT NOT NULL,
        warning_time TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT,
        prev_time TEXT
    );
    CREATE TABLE IF NOT EXISTS warnings_summary (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        serial_number TEXT NOT NULL,
        time TEXT NOT NULL,
        csv_start TEXT NOT NULL,
        next_csv_start TEXT NOT NULL,
        num_warnings INTEGER NOT NULL,
        written INTEGER NOT NULL
    );
";

fn db(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(db)?;
        let store = SqliteStore::init(conn)?;
        info!("SQLite database initialized at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        SqliteStore::init(Connection::open_in_memory().map_err(db)?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA).map_err(db)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn frame_count(&self) -> Result<i64, StorageError> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM received_files", [], |row| row.get(0))
            .map_err(db)
    }

    pub fn is_published(&self, id: FrameId) -> Result<bool, StorageError> {
        self.conn
            .lock()
            .query_row(
                "SELECT published FROM received_files WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?
            .ok_or(StorageError::NotFound(id))
    }

    pub fn frame_payload(&self, id: FrameId) -> Result<Vec<u8>, StorageError> {
        self.conn
            .lock()
            .query_row(
                "SELECT data FROM received_files WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?
            .ok_or(StorageError::NotFound(id))
    }

    /// Counts anomalies of one kind (`duplicate`, `missing` or `misplaced`).
    pub fn anomaly_count(&self, kind: &str) -> Result<i64, StorageError> {
        self.conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM warnings WHERE warning_type = ?1",
                params![kind],
                |row| row.get(0),
            )
            .map_err(db)
    }

    pub fn summary_count(&self) -> Result<i64, StorageError> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM warnings_summary", [], |row| row.get(0))
            .map_err(db)
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn insert_raw_frame(&self, frame: RawFrame) -> Result<FrameId, StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO received_files (name, serial_number, data, time_received, published)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                frame.path,
                frame.serial_number,
                &frame.payload[..],
                frame.received_at
            ],
        )
        .map_err(db)?;
        Ok(FrameId(conn.last_insert_rowid()))
    }

    async fn mark_published(&self, id: FrameId) -> Result<(), StorageError> {
        let updated = self
            .conn
            .lock()
            .execute(
                "UPDATE received_files SET published = 1 WHERE id = ?1",
                params![id.0],
            )
            .map_err(db)?;
        if updated == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    async fn upsert_last_seen(
        &self,
        serial_number: &str,
        time: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO latest_time (serial_number, time_received) VALUES (?1, ?2)
                 ON CONFLICT(serial_number) DO UPDATE SET time_received = excluded.time_received",
                params![serial_number, time],
            )
            .map_err(db)?;
        Ok(())
    }

    async fn find_last_seen(
        &self,
        serial_number: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.conn
            .lock()
            .query_row(
                "SELECT time_received FROM latest_time WHERE serial_number = ?1",
                params![serial_number],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)
    }

    async fn append_anomaly(&self, anomaly: &Anomaly) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO warnings
                 (serial_number, warning_type, warning_time, start_time, end_time, prev_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    anomaly.serial_number,
                    anomaly.kind.as_str(),
                    anomaly.detected_at,
                    anomaly.start_time,
                    anomaly.end_time,
                    anomaly.reference_cycle_start
                ],
            )
            .map_err(db)?;
        Ok(())
    }

    async fn append_summary(&self, summary: &CycleSummary) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO warnings_summary
                 (serial_number, time, csv_start, next_csv_start, num_warnings, written)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    summary.serial_number,
                    summary.detected_at,
                    summary.cycle_start,
                    summary.next_cycle_start,
                    summary.anomaly_count as i64,
                    summary.written
                ],
            )
            .map_err(db)?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
