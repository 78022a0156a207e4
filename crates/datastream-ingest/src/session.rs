// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream session
//!
//! One session per producer connection.
//!
//! # Lifecycle
//!
//! ```text
//! Open --> Receiving --(end of stream / shutdown)--> Closing --> Closed
//!              |                                        |
//!              +--(transport or flush error)--> Errored <+
//! ```
//!
//! 1. `Open`: flush scheduler started, buffer empty
//! 2. `Receiving`: each inbound record is stamped and appended to the buffer
//! 3. `Closing`: scheduler stopped and joined, one final flush, ack "ok"
//! 4. `Errored`: scheduler stopped and joined, best-effort final flush, ack
//!    "error" with the failure description
//!
//! `Closed` and `Errored` are terminal.

use crate::buffer::RecordBuffer;
use crate::config::{IngestConfig, MAX_BUFFER_CAPACITY};
use crate::error::IngestError;
use crate::protocol::StreamResponse;
use crate::record::{Reading, WireRecord};
use crate::scheduler::{FlushContext, FlushScheduler, SchedulerPolicy};
use crate::stats::IngestStats;
use crate::store::RecordStore;
use crate::transport::RecordStream;
use crate::writer::BatchWriter;
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Session protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Receiving,
    Closing,
    Closed,
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Receiving => "receiving",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// How a session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: String,
    /// `Closed` or `Errored`
    pub state: SessionState,
    /// The acknowledgement sent (or attempted) to the producer
    pub response: StreamResponse,
    /// Records accepted from the producer
    pub received: u64,
    /// Rows stored for this session
    pub persisted: u64,
    /// Records still unstored when the session ended
    pub unpersisted: usize,
    /// What sent the session to `Errored`
    pub error: Option<IngestError>,
    /// Whether the producer actually got the acknowledgement
    pub ack_delivered: bool,
}

/// Per-connection protocol handler.
pub struct StreamSession<S: RecordStore> {
    id: Arc<str>,
    state: SessionState,
    policy: SchedulerPolicy,
    ctx: Arc<FlushContext<S>>,
    stats: Arc<IngestStats>,
    next_sequence: u64,
}

impl<S: RecordStore + 'static> StreamSession<S> {
    /// Create a session in the `Open` state.
    pub fn new(config: &IngestConfig, writer: BatchWriter<S>, stats: Arc<IngestStats>) -> Self {
        let id: Arc<str> = Arc::from(Uuid::new_v4().to_string());
        let label = id[..8].to_string();
        let ctx = Arc::new(FlushContext::new(
            label,
            RecordBuffer::with_capacity(config.buffer_capacity.min(MAX_BUFFER_CAPACITY)),
            writer,
            Arc::clone(&stats),
        ));

        IngestStats::bump(&stats.sessions_opened, 1);
        tracing::info!("[{}] New stream session", ctx.label);

        Self {
            id,
            state: SessionState::Open,
            policy: SchedulerPolicy {
                interval: config.flush_interval(),
                on_failure: config.failure_policy,
                max_consecutive_failures: config.max_flush_failures,
            },
            ctx,
            stats,
            next_sequence: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Records buffered and not yet flushed.
    pub fn pending(&self) -> usize {
        self.ctx.buffer.len()
    }

    /// Stamp one inbound record and append it to the buffer.
    ///
    /// Only valid while `Receiving`. Returns the record's sequence number.
    pub fn accept(&mut self, wire: WireRecord) -> Result<u64, IngestError> {
        if self.state != SessionState::Receiving {
            return Err(IngestError::NotAccepting(self.state));
        }

        let now = Utc::now();
        let (reading, ts_error) = Reading::from_wire(wire, now);
        if let Some(e) = ts_error {
            IngestStats::bump(&self.stats.timestamps_defaulted, 1);
            tracing::warn!("[{}] {}; using receipt time", self.ctx.label, e);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let record = reading.into_record(Arc::clone(&self.id), sequence, now);
        tracing::trace!("[{}] Received {:?}", self.ctx.label, record);

        self.ctx.buffer.append(record);
        IngestStats::bump(&self.stats.records_received, 1);
        Ok(sequence)
    }

    /// Drive the session until the producer closes the stream or a failure.
    pub async fn run<T: RecordStream>(self, transport: &mut T) -> SessionOutcome {
        self.run_until(transport, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but `shutdown` completing is treated as end of
    /// stream: the session flushes, acknowledges and closes.
    pub async fn run_until<T, F>(mut self, transport: &mut T, shutdown: F) -> SessionOutcome
    where
        T: RecordStream,
        F: Future<Output = ()> + Send,
    {
        let mut scheduler = FlushScheduler::start(Arc::clone(&self.ctx), self.policy);
        self.state = SessionState::Receiving;
        tokio::pin!(shutdown);

        let failure = loop {
            tokio::select! {
                frame = transport.next_record() => match frame {
                    Ok(Some(wire)) => {
                        if let Err(e) = self.accept(wire) {
                            break Some(e);
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("[{}] Producer closed the stream", self.ctx.label);
                        break None;
                    }
                    Err(e) => break Some(IngestError::Transport(e)),
                },
                result = scheduler.finished() => {
                    break Some(match result {
                        Err(e) => e,
                        Ok(_) => IngestError::Task("flush scheduler exited early".to_string()),
                    });
                }
                _ = &mut shutdown => {
                    tracing::info!("[{}] Server shutting down, closing stream", self.ctx.label);
                    break None;
                }
            }
        };

        let outcome = match failure {
            None => self.close(scheduler).await,
            Some(error) => self.fail(scheduler, error).await,
        };
        self.acknowledge(transport, outcome).await
    }

    /// `Closing`: stop the scheduler, then make the final flush the last word.
    async fn close(&mut self, scheduler: FlushScheduler) -> Result<(), IngestError> {
        self.state = SessionState::Closing;

        if let Err(e) = scheduler.stop().await {
            return self.fail_after_stop(e).await;
        }

        match self.ctx.flush().await {
            Ok(0) => {}
            Ok(size) => {
                tracing::info!("[{}] Flushed {} records on end of stream", self.ctx.label, size);
            }
            Err(failure) => {
                tracing::error!(
                    "[{}] Final flush of {} records failed: {}",
                    self.ctx.label,
                    failure.batch.len(),
                    failure.error
                );
                // Put the batch back so the unstored count stays accurate.
                let error = self.ctx.requeue(failure);
                self.state = SessionState::Errored;
                return Err(IngestError::Persistence {
                    records: self.ctx.buffer.len(),
                    source: error,
                });
            }
        }

        self.state = SessionState::Closed;
        Ok(())
    }

    /// `Errored` from `Receiving`.
    async fn fail(
        &mut self,
        scheduler: FlushScheduler,
        error: IngestError,
    ) -> Result<(), IngestError> {
        if let Err(e) = scheduler.stop().await {
            tracing::debug!("[{}] Scheduler ended with: {}", self.ctx.label, e);
        }
        self.fail_after_stop(error).await
    }

    async fn fail_after_stop(&mut self, error: IngestError) -> Result<(), IngestError> {
        self.state = SessionState::Errored;
        tracing::error!("[{}] Session failed: {}", self.ctx.label, error);

        // Best effort: the records may still be storable even if the stream died.
        match self.ctx.flush().await {
            Ok(0) => {}
            Ok(size) => {
                tracing::info!(
                    "[{}] Best-effort flush stored {} records",
                    self.ctx.label,
                    size
                );
            }
            Err(failure) => {
                tracing::error!(
                    "[{}] Best-effort flush of {} records failed: {}",
                    self.ctx.label,
                    failure.batch.len(),
                    failure.error
                );
                self.ctx.requeue(failure);
            }
        }

        // The count carried by a scheduler escalation predates this flush.
        Err(error.with_unpersisted(self.ctx.buffer.len()))
    }

    async fn acknowledge<T: RecordStream>(
        self,
        transport: &mut T,
        result: Result<(), IngestError>,
    ) -> SessionOutcome {
        let persisted = self.ctx.persisted();
        let unpersisted = self.ctx.buffer.len();

        let (response, error) = match result {
            Ok(()) => (StreamResponse::ok(persisted), None),
            Err(e) => {
                let mut message = e.to_string();
                if unpersisted > 0 && !matches!(e, IngestError::Persistence { .. }) {
                    message.push_str(&format!("; {} records unpersisted", unpersisted));
                }
                (StreamResponse::error(message, persisted), Some(e))
            }
        };

        if unpersisted > 0 {
            IngestStats::bump(&self.stats.records_unpersisted, unpersisted as u64);
        }
        match self.state {
            SessionState::Closed => IngestStats::bump(&self.stats.sessions_closed, 1),
            _ => IngestStats::bump(&self.stats.sessions_errored, 1),
        }

        let ack_delivered = match transport.send_response(&response).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "[{}] Could not deliver {:?} acknowledgement: {}",
                    self.ctx.label,
                    response.status,
                    e
                );
                false
            }
        };

        tracing::info!(
            "[{}] Session {}: {} received, {} persisted",
            self.ctx.label,
            self.state,
            self.next_sequence,
            persisted
        );

        SessionOutcome {
            session_id: self.id.to_string(),
            state: self.state,
            response,
            received: self.next_sequence,
            persisted,
            unpersisted,
            error,
            ack_delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckStatus;
    use crate::store::MemoryStore;
    use crate::transport::channel_transport;
    use std::time::Duration;

    fn session(store: &Arc<MemoryStore>) -> StreamSession<MemoryStore> {
        let config = IngestConfig::builder()
            .flush_interval(Duration::from_secs(5))
            .build();
        let stats = Arc::new(IngestStats::new());
        StreamSession::new(
            &config,
            BatchWriter::new(Arc::clone(store), Arc::clone(&stats)),
            stats,
        )
    }

    fn wire(value: f64) -> WireRecord {
        WireRecord {
            value,
            sensor_type: "temperature".to_string(),
            source_id: "room-101".to_string(),
            sub_id: 1,
            observed_at: Some("2025-02-02T02:02:02Z".to_string()),
        }
    }

    #[test]
    fn test_accept_rejected_outside_receiving() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session(&store);
        assert_eq!(session.state(), SessionState::Open);
        assert!(matches!(
            session.accept(wire(1.0)),
            Err(IngestError::NotAccepting(SessionState::Open))
        ));
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let session = session(&store);
        let id = session.id().to_string();
        let (producer, mut transport) = channel_transport(8);

        let task = tokio::spawn(async move { session.run(&mut transport).await });
        for i in 0..3 {
            producer.send(wire(i as f64)).await.unwrap();
        }
        let resp = producer.finish().await.unwrap();
        let outcome = task.await.unwrap();

        assert_eq!(resp.status, AckStatus::Ok);
        assert_eq!(outcome.state, SessionState::Closed);
        let seqs: Vec<u64> = store
            .load_session(&id)
            .unwrap()
            .iter()
            .map(|r| r.sequence())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_defaulted_timestamp_is_counted() {
        let store = Arc::new(MemoryStore::new());
        let stats = Arc::new(IngestStats::new());
        let config = IngestConfig::default();
        let session = StreamSession::new(
            &config,
            BatchWriter::new(Arc::clone(&store), Arc::clone(&stats)),
            Arc::clone(&stats),
        );
        let (producer, mut transport) = channel_transport(8);
        let task = tokio::spawn(async move { session.run(&mut transport).await });

        let mut bad = wire(1.0);
        bad.observed_at = Some("not-a-time".to_string());
        producer.send(bad).await.unwrap();
        producer.finish().await.unwrap();
        task.await.unwrap();

        assert_eq!(stats.snapshot().timestamps_defaulted, 1);
        assert!(store.records()[0].timestamp_source().is_defaulted());
    }

    #[test]
    fn test_oversized_capacity_does_not_abort() {
        let store = Arc::new(MemoryStore::new());
        let stats = Arc::new(IngestStats::new());
        let config = IngestConfig::builder().buffer_capacity(usize::MAX).build();

        let session = StreamSession::new(
            &config,
            BatchWriter::new(Arc::clone(&store), Arc::clone(&stats)),
            stats,
        );
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_stream() {
        let store = Arc::new(MemoryStore::new());
        let session = session(&store);
        let (producer, mut transport) = channel_transport(8);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            session
                .run_until(&mut transport, async move {
                    let _ = stop_rx.await;
                })
                .await
        });
        producer.send(wire(1.0)).await.unwrap();
        tokio::task::yield_now().await;
        stop_tx.send(()).unwrap();

        let resp = producer.response().await.unwrap();
        let outcome = task.await.unwrap();
        assert!(resp.is_ok());
        assert_eq!(outcome.state, SessionState::Closed);
    }
}
