// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite record backend
//!
//! Durable storage for batched telemetry records.

use crate::error::StoreError;
use crate::record::{from_unix_nanos, to_unix_nanos, Record, TimestampSource};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const SELECT_COLUMNS: &str = "SELECT session_id, sequence, sensor_value, sensor_type, source_id,
        sub_id, observed_at_ns, received_at_ns, timestamp_defaulted
     FROM sensor_data";

/// SQLite record store
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE sensor_data (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     session_id TEXT NOT NULL,
///     sequence INTEGER NOT NULL,
///     sensor_value REAL NOT NULL,
///     sensor_type TEXT NOT NULL CHECK (length(sensor_type) > 0),
///     source_id TEXT NOT NULL,
///     sub_id INTEGER NOT NULL,
///     observed_at_ns INTEGER NOT NULL,
///     received_at_ns INTEGER NOT NULL,
///     timestamp_defaulted INTEGER NOT NULL DEFAULT 0
/// );
/// CREATE UNIQUE INDEX idx_session_seq ON sensor_data(session_id, sequence);
/// CREATE INDEX idx_ids_ts ON sensor_data(source_id, sub_id, observed_at_ns);
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a file-based database
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // WAL keeps readers from blocking the batch writer.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sensor_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                sensor_value REAL NOT NULL,
                sensor_type TEXT NOT NULL CHECK (length(sensor_type) > 0),
                source_id TEXT NOT NULL,
                sub_id INTEGER NOT NULL,
                observed_at_ns INTEGER NOT NULL,
                received_at_ns INTEGER NOT NULL,
                timestamp_defaulted INTEGER NOT NULL DEFAULT 0
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_session_seq
                ON sensor_data(session_id, sequence);
            CREATE INDEX IF NOT EXISTS idx_ids_ts
                ON sensor_data(source_id, sub_id, observed_at_ns);
            CREATE INDEX IF NOT EXISTS idx_observed
                ON sensor_data(observed_at_ns);",
        )?;

        Ok(())
    }

    /// Helper function to map a row to a Record
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
        let session_id: String = row.get(0)?;
        let defaulted: bool = row.get(8)?;

        Ok(Record::from_stored(
            Arc::from(session_id),
            row.get::<_, i64>(1)? as u64,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            from_unix_nanos(row.get(6)?),
            from_unix_nanos(row.get(7)?),
            if defaulted {
                TimestampSource::Defaulted
            } else {
                TimestampSource::Producer
            },
        ))
    }

    fn select(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Record>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{} {}", SELECT_COLUMNS, filter))?;
        let records = stmt
            .query_map(params, Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl RecordStore for SqliteStore {
    fn insert_many(&self, records: &[Record]) -> Result<usize, StoreError> {
        let mut conn = self.lock();

        // Dropping `tx` without commit rolls the whole batch back.
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO sensor_data (session_id, sequence, sensor_value, sensor_type,
                    source_id, sub_id, observed_at_ns, received_at_ns, timestamp_defaulted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(session_id, sequence) DO NOTHING",
            )?;

            for record in records {
                inserted += stmt.execute(params![
                    record.session_id(),
                    record.sequence() as i64,
                    record.value(),
                    record.sensor_type(),
                    record.source_id(),
                    record.sub_id(),
                    record.observed_at_ns(),
                    record.received_at_ns(),
                    record.timestamp_source().is_defaulted(),
                ])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sensor_data", [], |row| row.get(0))?;

        Ok(count as usize)
    }

    fn load_session(&self, session_id: &str) -> Result<Vec<Record>, StoreError> {
        self.select("WHERE session_id = ?1 ORDER BY sequence ASC", [session_id])
    }

    fn load_source(&self, source_id: &str) -> Result<Vec<Record>, StoreError> {
        self.select(
            "WHERE source_id = ?1 ORDER BY observed_at_ns ASC, id ASC",
            [source_id],
        )
    }

    fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError> {
        self.select(
            "WHERE observed_at_ns BETWEEN ?1 AND ?2 ORDER BY observed_at_ns ASC, id ASC",
            params![to_unix_nanos(from), to_unix_nanos(to)],
        )
    }

    fn clear(&self) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute("DELETE FROM sensor_data", [])?;
        Ok(())
    }
}
