// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending-record buffer shared by the receive loop and the flush path.
//!
//! A single mutex covers append, drain and requeue, so every operation is
//! linearizable: a drain returns a contiguous prefix of not-yet-drained
//! records in receipt order, and no record is drained twice.

use crate::record::Record;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutex-guarded accumulator of records awaiting a flush.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    records: Mutex<Vec<Record>>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the backing vector.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    // A panic while holding the lock cannot leave the Vec half-updated, so
    // poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one record.
    pub fn append(&self, record: Record) {
        self.lock().push(record);
    }

    /// Remove and return everything currently held.
    ///
    /// Returns an empty vector when nothing is pending.
    pub fn drain_all(&self) -> Vec<Record> {
        std::mem::take(&mut *self.lock())
    }

    /// Put a failed batch back in front of anything appended since it was
    /// drained, keeping receipt order intact.
    pub fn requeue_front(&self, mut batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        let mut records = self.lock();
        batch.append(&mut records);
        *records = batch;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
