// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastream Ingest
//!
//! Receives long-lived telemetry streams from producers, buffers the records in
//! memory and commits them to storage in periodic batches.
//!
//! # Features
//!
//! - **Timer-driven flushing** -- One write per interval per session, not one per record
//! - **Atomic batches** -- A batch is stored whole or not at all
//! - **No silent loss** -- Failed batches are re-queued; what cannot be stored is reported
//! - **Idempotent retries** -- `(session_id, sequence)` dedup in the store
//! - **SQLite Backend** -- WAL-mode SQLite, or an in-memory store for tests
//!
//! # Architecture
//!
//! ```text
//! IngestServer                (TCP listener, one task per connection)
//! +-- StreamSession           (protocol state machine, final flush, ack)
//!     +-- RecordBuffer        (shared, mutex-guarded)
//!     +-- FlushScheduler      (interval task, drain + write)
//!     +-- BatchWriter         (transactional insert on the blocking pool)
//!         +-- RecordStore     (SQLite or in-memory backend)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use datastream_ingest::{IngestConfig, IngestServer, SqliteStore};
//! use std::sync::Arc;
//!
//! let config = IngestConfig::builder()
//!     .listen_addr("0.0.0.0:50051")
//!     .flush_interval(std::time::Duration::from_secs(5))
//!     .build();
//!
//! let store = Arc::new(SqliteStore::new("datastream.db")?);
//! let server = IngestServer::bind(config, store).await?;
//! server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod record;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod sqlite;
pub mod stats;
pub mod store;
pub mod transport;
pub mod writer;

pub use buffer::RecordBuffer;
pub use config::{FailurePolicy, IngestConfig, IngestConfigBuilder, MAX_BUFFER_CAPACITY};
pub use error::{ConfigError, IngestError, StoreError, TransportError};
pub use protocol::{AckStatus, StreamRequest, StreamResponse};
pub use record::{parse_observed_at, Reading, Record, TimestampError, TimestampSource, WireRecord};
pub use scheduler::{FlushScheduler, SchedulerPolicy, SchedulerReport};
pub use server::IngestServer;
pub use session::{SessionOutcome, SessionState, StreamSession};
pub use sqlite::SqliteStore;
pub use stats::{IngestStats, IngestStatsSnapshot};
pub use store::{MemoryStore, RecordStore, WriteHold};
pub use transport::{
    channel_transport, ChannelProducer, ChannelTransport, LineTransport, RecordStream,
    MAX_FRAME_BYTES,
};
pub use writer::{BatchWriter, WriteFailure};
