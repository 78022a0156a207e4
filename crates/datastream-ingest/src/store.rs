// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record store abstraction
//!
//! Defines the trait for storage backends (SQLite, in-memory).

use crate::error::StoreError;
use crate::record::Record;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Record store trait
///
/// Backend-agnostic interface consumed by the batch writer.
///
/// # Implementations
///
/// - `SqliteStore` -- Default, durable
/// - `MemoryStore` -- In-process, with fault injection for tests
pub trait RecordStore: Send + Sync {
    /// Insert a batch inside one transaction.
    ///
    /// Either every record of the batch becomes visible or none does. Records
    /// whose `(session_id, sequence)` is already stored are skipped, so the
    /// returned count is the number of newly stored rows.
    fn insert_many(&self, records: &[Record]) -> Result<usize, StoreError>;

    /// Total number of stored records
    fn count(&self) -> Result<usize, StoreError>;

    /// All records of one stream session, in sequence order
    fn load_session(&self, session_id: &str) -> Result<Vec<Record>, StoreError>;

    /// All records of one source, ordered by observation time
    fn load_source(&self, source_id: &str) -> Result<Vec<Record>, StoreError>;

    /// Records observed within `[from, to]`, ordered by observation time
    fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Remove every record
    fn clear(&self) -> Result<(), StoreError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn insert_many(&self, records: &[Record]) -> Result<usize, StoreError> {
        (**self).insert_many(records)
    }

    fn count(&self) -> Result<usize, StoreError> {
        (**self).count()
    }

    fn load_session(&self, session_id: &str) -> Result<Vec<Record>, StoreError> {
        (**self).load_session(session_id)
    }

    fn load_source(&self, source_id: &str) -> Result<Vec<Record>, StoreError> {
        (**self).load_source(source_id)
    }

    fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError> {
        (**self).query_range(from, to)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// In-memory record store.
///
/// Applies the same rules as the SQLite schema (non-empty type, unique
/// `(session_id, sequence)`) and can be told to fail upcoming writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    hold: Mutex<Option<HeldWrite>>,
}

#[derive(Debug)]
struct HeldWrite {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// A write parked by [`MemoryStore::hold_next_write`].
///
/// Dropping the handle releases the write.
#[derive(Debug)]
pub struct WriteHold {
    entered: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<()>,
}

impl WriteHold {
    /// Wait until the held write has reached the store.
    pub async fn entered(&mut self) {
        if let Some(entered) = self.entered.take() {
            let _ = entered.await;
        }
    }

    /// Let the held write proceed.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    rows: Vec<Record>,
    keys: HashSet<(String, u64)>,
    fail_next: usize,
    write_calls: Vec<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` calls to `insert_many` fail without storing anything.
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Park the next `insert_many` call until the returned handle is released.
    ///
    /// The held call blocks its thread, so it must run off the async runtime
    /// (the batch writer always calls the store from the blocking pool). It is
    /// not counted in `write_calls` until released.
    pub fn hold_next_write(&self) -> WriteHold {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.hold.lock().unwrap_or_else(PoisonError::into_inner) = Some(HeldWrite {
            entered: entered_tx,
            release: release_rx,
        });

        WriteHold {
            entered: Some(entered_rx),
            release: release_tx,
        }
    }

    /// Batch sizes of every `insert_many` call so far, failed ones included.
    pub fn write_calls(&self) -> Vec<usize> {
        self.lock().write_calls.clone()
    }

    /// Stored records in insertion order.
    pub fn records(&self) -> Vec<Record> {
        self.lock().rows.clone()
    }
}

impl RecordStore for MemoryStore {
    fn insert_many(&self, records: &[Record]) -> Result<usize, StoreError> {
        let held = self.hold.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(held) = held {
            let _ = held.entered.send(());
            let _ = held.release.blocking_recv();
        }

        let mut inner = self.lock();
        inner.write_calls.push(records.len());

        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        if let Some(bad) = records.iter().find(|r| r.sensor_type().is_empty()) {
            return Err(StoreError::Rejected(format!(
                "empty sensor type (session {}, sequence {})",
                bad.session_id(),
                bad.sequence()
            )));
        }

        let mut inserted = 0;
        for record in records {
            let key = (record.session_id().to_string(), record.sequence());
            if inner.keys.insert(key) {
                inner.rows.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock().rows.len())
    }

    fn load_session(&self, session_id: &str) -> Result<Vec<Record>, StoreError> {
        let mut out: Vec<Record> = self
            .lock()
            .rows
            .iter()
            .filter(|r| r.session_id() == session_id)
            .cloned()
            .collect();
        out.sort_by_key(Record::sequence);
        Ok(out)
    }

    fn load_source(&self, source_id: &str) -> Result<Vec<Record>, StoreError> {
        let mut out: Vec<Record> = self
            .lock()
            .rows
            .iter()
            .filter(|r| r.source_id() == source_id)
            .cloned()
            .collect();
        out.sort_by_key(Record::observed_at);
        Ok(out)
    }

    fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut out: Vec<Record> = self
            .lock()
            .rows
            .iter()
            .filter(|r| r.observed_at() >= from && r.observed_at() <= to)
            .cloned()
            .collect();
        out.sort_by_key(Record::observed_at);
        Ok(out)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.rows.clear();
        inner.keys.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Reading, WireRecord};
    use chrono::TimeZone;

    fn record(seq: u64, sensor_type: &str) -> Record {
        let wire = WireRecord {
            value: 1.0,
            sensor_type: sensor_type.to_string(),
            source_id: "room-101".to_string(),
            sub_id: 1,
            observed_at: Some(format!("2025-01-01T00:00:{:02}Z", seq % 60)),
        };
        let now = Utc::now();
        Reading::from_wire(wire, now)
            .0
            .into_record(Arc::from("mem"), seq, now)
    }

    #[test]
    fn test_memory_store_insert_and_count() {
        let store = MemoryStore::new();
        let inserted = store
            .insert_many(&[record(0, "light"), record(1, "light")])
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.write_calls(), vec![2]);
    }

    #[test]
    fn test_memory_store_dedups_retried_batch() {
        let store = MemoryStore::new();
        let batch = vec![record(0, "light"), record(1, "light")];
        store.insert_many(&batch).unwrap();
        assert_eq!(store.insert_many(&batch).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_memory_store_rejects_whole_batch() {
        let store = MemoryStore::new();
        let batch = vec![record(0, "light"), record(1, ""), record(2, "light")];
        assert!(matches!(
            store.insert_many(&batch),
            Err(StoreError::Rejected(_))
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_memory_store_injected_failures() {
        let store = MemoryStore::new();
        store.fail_next(1);
        assert!(store.insert_many(&[record(0, "co2")]).is_err());
        assert_eq!(store.insert_many(&[record(0, "co2")]).unwrap(), 1);
        assert_eq!(store.write_calls(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_memory_store_held_write() {
        let store = Arc::new(MemoryStore::new());
        let mut hold = store.hold_next_write();

        let writer = Arc::clone(&store);
        let write =
            tokio::task::spawn_blocking(move || writer.insert_many(&[record(0, "light")]));

        hold.entered().await;
        assert!(store.write_calls().is_empty());
        assert!(!write.is_finished());

        hold.release();
        assert_eq!(write.await.unwrap().unwrap(), 1);
        assert_eq!(store.write_calls(), vec![1]);
    }

    #[test]
    fn test_memory_store_queries() {
        let store = MemoryStore::new();
        store
            .insert_many(&[record(5, "co2"), record(2, "co2"), record(9, "co2")])
            .unwrap();

        let session: Vec<u64> = store
            .load_session("mem")
            .unwrap()
            .iter()
            .map(Record::sequence)
            .collect();
        assert_eq!(session, vec![2, 5, 9]);

        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 2).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 5).unwrap();
        assert_eq!(store.query_range(from, to).unwrap().len(), 2);
        assert_eq!(store.load_source("room-101").unwrap().len(), 3);

        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}
