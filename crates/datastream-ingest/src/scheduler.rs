// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timer-driven flush task
//!
//! Runs next to a session's receive loop and flushes the shared buffer once
//! per interval, whatever the ingest rate.
//!
//! # Shutdown
//!
//! The session stops the task with an explicit stop signal and then joins it.
//! A tick that is mid-write when the signal arrives finishes first; no tick
//! starts afterwards. Only then does the session run its final flush, so the
//! final flush always sees every record and always comes last.

use crate::buffer::RecordBuffer;
use crate::config::FailurePolicy;
use crate::error::IngestError;
use crate::stats::IngestStats;
use crate::store::RecordStore;
use crate::writer::{BatchWriter, WriteFailure};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// State shared by a session and its flush task.
pub(crate) struct FlushContext<S: RecordStore> {
    pub(crate) label: String,
    pub(crate) buffer: RecordBuffer,
    pub(crate) writer: BatchWriter<S>,
    pub(crate) stats: Arc<IngestStats>,
    persisted: AtomicU64,
}

impl<S: RecordStore + 'static> FlushContext<S> {
    pub(crate) fn new(
        label: String,
        buffer: RecordBuffer,
        writer: BatchWriter<S>,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            label,
            buffer,
            writer,
            stats,
            persisted: AtomicU64::new(0),
        }
    }

    /// Rows stored for this session so far.
    pub(crate) fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Drain the buffer and write whatever was pending.
    ///
    /// Returns the number of drained records (0 means the store was not
    /// touched).
    pub(crate) async fn flush(&self) -> Result<usize, WriteFailure> {
        let batch = self.buffer.drain_all();
        let size = batch.len();
        if size == 0 {
            return Ok(0);
        }

        let inserted = self.writer.write(batch).await?;
        self.persisted.fetch_add(inserted as u64, Ordering::Relaxed);
        Ok(size)
    }

    /// Push a failed batch back for the next attempt.
    pub(crate) fn requeue(&self, failure: WriteFailure) -> crate::error::StoreError {
        let records = failure.batch.len() as u64;
        self.buffer.requeue_front(failure.batch);
        IngestStats::bump(&self.stats.records_requeued, records);
        failure.error
    }
}

/// Scheduler run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Timer ticks handled
    pub ticks: u64,
    /// Ticks that committed a batch
    pub flushes: u64,
    /// Ticks whose write failed
    pub failures: u64,
}

/// Failure handling for scheduled flushes.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerPolicy {
    pub interval: Duration,
    pub on_failure: FailurePolicy,
    pub max_consecutive_failures: u32,
}

/// Handle to a running flush task.
pub struct FlushScheduler {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<Result<SchedulerReport, IngestError>>>,
    outcome: Option<Result<SchedulerReport, IngestError>>,
}

impl FlushScheduler {
    /// Spawn the flush task. The first tick fires one full interval from now.
    pub(crate) fn start<S: RecordStore + 'static>(
        ctx: Arc<FlushContext<S>>,
        policy: SchedulerPolicy,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_ticks(ctx, policy, stop_rx));

        Self {
            stop_tx,
            handle: Some(handle),
            outcome: None,
        }
    }

    /// Resolves only if the task ends by itself, i.e. it escalated a flush
    /// failure. Safe to use as a `select!` branch.
    pub async fn finished(&mut self) -> Result<SchedulerReport, IngestError> {
        match self.handle.as_mut() {
            Some(handle) => {
                let outcome = join_outcome(handle.await);
                self.handle = None;
                match outcome {
                    Ok(report) => {
                        self.outcome = Some(Ok(report));
                        Ok(report)
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        self.outcome = Some(Err(IngestError::Task(msg)));
                        Err(e)
                    }
                }
            }
            None => std::future::pending().await,
        }
    }

    /// Signal the task to stop and wait for it, including any in-flight flush.
    pub async fn stop(mut self) -> Result<SchedulerReport, IngestError> {
        let _ = self.stop_tx.send(true);

        match self.handle.take() {
            Some(handle) => join_outcome(handle.await),
            None => self.outcome.take().unwrap_or(Ok(SchedulerReport::default())),
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        // Never leave a ticking timer behind a dropped session.
        let _ = self.stop_tx.send(true);
    }
}

fn join_outcome(
    joined: Result<Result<SchedulerReport, IngestError>, tokio::task::JoinError>,
) -> Result<SchedulerReport, IngestError> {
    match joined {
        Ok(outcome) => outcome,
        Err(e) => Err(IngestError::Task(e.to_string())),
    }
}

async fn run_ticks<S: RecordStore + 'static>(
    ctx: Arc<FlushContext<S>>,
    policy: SchedulerPolicy,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<SchedulerReport, IngestError> {
    let mut ticker = interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let max_failures = policy.max_consecutive_failures.max(1);
    let mut consecutive_failures = 0u32;
    let mut report = SchedulerReport::default();

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        if *stop_rx.borrow() {
            break;
        }

        report.ticks += 1;
        match ctx.flush().await {
            Ok(0) => {}
            Ok(size) => {
                consecutive_failures = 0;
                report.flushes += 1;
                tracing::info!("[{}] Auto flushed {} records", ctx.label, size);
            }
            Err(failure) => {
                consecutive_failures += 1;
                report.failures += 1;
                let size = failure.batch.len();
                let error = ctx.requeue(failure);

                let escalate = match policy.on_failure {
                    FailurePolicy::Escalate => true,
                    FailurePolicy::Requeue => consecutive_failures >= max_failures,
                };
                if escalate {
                    tracing::error!(
                        "[{}] Giving up on scheduled flush after {} failure(s): {}",
                        ctx.label,
                        consecutive_failures,
                        error
                    );
                    return Err(IngestError::Persistence {
                        records: ctx.buffer.len(),
                        source: error,
                    });
                }
                tracing::warn!(
                    "[{}] Scheduled flush of {} records failed ({}/{}), re-queued: {}",
                    ctx.label,
                    size,
                    consecutive_failures,
                    max_failures,
                    error
                );
            }
        }
    }

    tracing::debug!(
        "[{}] Flush scheduler stopped after {} ticks",
        ctx.label,
        report.ticks
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Reading, Record, WireRecord};
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn record(seq: u64) -> Record {
        let wire = WireRecord {
            value: 3.0,
            sensor_type: "light".to_string(),
            source_id: "room-101".to_string(),
            sub_id: 1,
            observed_at: None,
        };
        let now = Utc::now();
        Reading::from_wire(wire, now)
            .0
            .into_record(Arc::from("sched"), seq, now)
    }

    fn context(store: &Arc<MemoryStore>) -> Arc<FlushContext<MemoryStore>> {
        let stats = Arc::new(IngestStats::new());
        Arc::new(FlushContext::new(
            "sched".to_string(),
            RecordBuffer::new(),
            BatchWriter::new(Arc::clone(store), Arc::clone(&stats)),
            stats,
        ))
    }

    fn policy(on_failure: FailurePolicy, max: u32) -> SchedulerPolicy {
        SchedulerPolicy {
            interval: Duration::from_secs(5),
            on_failure,
            max_consecutive_failures: max,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_scheduler_never_writes() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store);
        let scheduler = FlushScheduler::start(Arc::clone(&ctx), policy(FailurePolicy::Requeue, 3));

        tokio::time::sleep(Duration::from_secs(21)).await;
        let report = scheduler.stop().await.unwrap();

        assert_eq!(report.ticks, 4);
        assert_eq!(report.flushes, 0);
        assert!(store.write_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_flush_before_first_interval() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store);
        ctx.buffer.append(record(0));
        let scheduler = FlushScheduler::start(Arc::clone(&ctx), policy(FailurePolicy::Requeue, 3));

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(store.write_calls().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await.unwrap();
        assert_eq!(store.write_calls(), vec![1]);
        assert_eq!(ctx.persisted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_then_recover() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store);
        store.fail_next(1);
        ctx.buffer.append(record(0));
        let scheduler = FlushScheduler::start(Arc::clone(&ctx), policy(FailurePolicy::Requeue, 3));

        tokio::time::sleep(Duration::from_millis(5100)).await;
        ctx.buffer.append(record(1));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let report = scheduler.stop().await.unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.flushes, 1);
        assert_eq!(store.write_calls(), vec![1, 2]);
        let stored: Vec<u64> = store.records().iter().map(Record::sequence).collect();
        assert_eq!(stored, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalate_ends_task() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store);
        store.fail_next(1);
        ctx.buffer.append(record(0));
        let mut scheduler =
            FlushScheduler::start(Arc::clone(&ctx), policy(FailurePolicy::Escalate, 3));

        let err = scheduler.finished().await.unwrap_err();
        assert_eq!(err.unpersisted(), 1);
        // The failed batch is back in the buffer for the final flush.
        assert_eq!(ctx.buffer.len(), 1);
        assert!(scheduler.stop().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_escalates_after_limit() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store);
        store.fail_next(10);
        ctx.buffer.append(record(0));
        let mut scheduler =
            FlushScheduler::start(Arc::clone(&ctx), policy(FailurePolicy::Requeue, 2));

        assert!(scheduler.finished().await.is_err());
        assert_eq!(store.write_calls(), vec![1, 1]);
        assert_eq!(ctx.buffer.len(), 1);
    }
}
