// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by every session of a server.
#[derive(Debug)]
pub struct IngestStats {
    /// Sessions accepted.
    pub sessions_opened: AtomicU64,

    /// Sessions acknowledged with status "ok".
    pub sessions_closed: AtomicU64,

    /// Sessions ended in the Errored state.
    pub sessions_errored: AtomicU64,

    /// Records accepted into a buffer.
    pub records_received: AtomicU64,

    /// Records whose observation time was replaced by the receipt time.
    pub timestamps_defaulted: AtomicU64,

    /// Successful batch writes.
    pub batches_written: AtomicU64,

    /// Rows newly stored.
    pub records_persisted: AtomicU64,

    /// Failed batch writes.
    pub flush_failures: AtomicU64,

    /// Records pushed back into a buffer after a failed write.
    pub records_requeued: AtomicU64,

    /// Records left unstored when a session ended.
    pub records_unpersisted: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            sessions_errored: AtomicU64::new(0),
            records_received: AtomicU64::new(0),
            timestamps_defaulted: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
            records_persisted: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            records_requeued: AtomicU64::new(0),
            records_unpersisted: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_errored: self.sessions_errored.load(Ordering::Relaxed),
            records_received: self.records_received.load(Ordering::Relaxed),
            timestamps_defaulted: self.timestamps_defaulted.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            records_requeued: self.records_requeued.load(Ordering::Relaxed),
            records_unpersisted: self.records_unpersisted.load(Ordering::Relaxed),
            uptime: self.created.elapsed(),
        }
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_errored: u64,
    pub records_received: u64,
    pub timestamps_defaulted: u64,
    pub batches_written: u64,
    pub records_persisted: u64,
    pub flush_failures: u64,
    pub records_requeued: u64,
    pub records_unpersisted: u64,
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = IngestStats::new();
        IngestStats::bump(&stats.records_received, 3);
        IngestStats::bump(&stats.flush_failures, 1);

        let snap = stats.snapshot();
        assert_eq!(snap.records_received, 3);
        assert_eq!(snap.flush_failures, 1);
        assert_eq!(snap.batches_written, 0);
    }
}
