// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch writer
//!
//! Commits a drained batch through a [`RecordStore`] as one transaction. The
//! store call runs on the blocking pool; the batch is handed back to the
//! caller when the write fails so it can be re-queued instead of dropped.

use crate::error::{IngestError, StoreError};
use crate::record::Record;
use crate::stats::IngestStats;
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Instant;

/// A batch the store refused, returned intact.
#[derive(Debug)]
pub struct WriteFailure {
    pub batch: Vec<Record>,
    pub error: StoreError,
}

impl WriteFailure {
    /// Give up on the batch and turn the failure into a session error.
    pub fn into_error(self) -> IngestError {
        IngestError::Persistence {
            records: self.batch.len(),
            source: self.error,
        }
    }
}

/// Transactional batch persistence.
pub struct BatchWriter<S: RecordStore> {
    store: Arc<S>,
    stats: Arc<IngestStats>,
}

impl<S: RecordStore> Clone for BatchWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S: RecordStore + 'static> BatchWriter<S> {
    pub fn new(store: Arc<S>, stats: Arc<IngestStats>) -> Self {
        Self { store, stats }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist `batch` atomically.
    ///
    /// Returns the number of newly stored rows. An empty batch never reaches
    /// the store.
    pub async fn write(&self, batch: Vec<Record>) -> Result<usize, WriteFailure> {
        if batch.is_empty() {
            return Ok(0);
        }

        let size = batch.len();
        let started = Instant::now();
        let batch = Arc::new(batch);
        let shared = Arc::clone(&batch);
        let store = Arc::clone(&self.store);

        let result = match tokio::task::spawn_blocking(move || store.insert_many(&shared)).await
        {
            Ok(result) => result,
            Err(e) => Err(StoreError::Unavailable(format!("store task failed: {}", e))),
        };

        match result {
            Ok(inserted) => {
                IngestStats::bump(&self.stats.batches_written, 1);
                IngestStats::bump(&self.stats.records_persisted, inserted as u64);
                if inserted < size {
                    tracing::debug!(
                        "Batch of {} records stored {} rows ({} already present)",
                        size,
                        inserted,
                        size - inserted
                    );
                }
                tracing::debug!(
                    "Committed batch: {} records in {:?}",
                    size,
                    started.elapsed()
                );
                Ok(inserted)
            }
            Err(error) => {
                IngestStats::bump(&self.stats.flush_failures, 1);
                tracing::warn!("Batch of {} records rolled back: {}", size, error);
                // The blocking task has finished, so this is normally the only handle left.
                let batch = Arc::try_unwrap(batch).unwrap_or_else(|shared| (*shared).clone());
                Err(WriteFailure { batch, error })
            }
        }
    }
}
