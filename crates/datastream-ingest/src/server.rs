// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP stream listener
//!
//! Accepts producer connections and runs one [`StreamSession`] per connection.
//! Sessions share the record store and the statistics, nothing else.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::session::{SessionState, StreamSession};
use crate::stats::{IngestStats, IngestStatsSnapshot};
use crate::store::RecordStore;
use crate::transport::LineTransport;
use crate::writer::BatchWriter;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Ingest server
pub struct IngestServer<S: RecordStore> {
    config: IngestConfig,
    listener: TcpListener,
    writer: BatchWriter<S>,
    stats: Arc<IngestStats>,
}

impl<S: RecordStore + 'static> IngestServer<S> {
    /// Bind the listener. Use port 0 to let the OS pick one.
    pub async fn bind(config: IngestConfig, store: Arc<S>) -> Result<Self, IngestError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let stats = Arc::new(IngestStats::new());

        Ok(Self {
            writer: BatchWriter::new(store, Arc::clone(&stats)),
            config,
            listener,
            stats,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IngestError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Open sessions are then told to close: each flushes what it holds and
    /// acknowledges its producer before this returns.
    pub async fn run_until<F>(self, shutdown: F) -> Result<IngestStatsSnapshot, IngestError>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        tracing::info!("Ingest server listening on {}", addr);
        tracing::info!("  Flush interval: {:?}", self.config.flush_interval());
        tracing::info!("  Failure policy: {:?}", self.config.failure_policy);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let session = StreamSession::new(
                            &self.config,
                            self.writer.clone(),
                            Arc::clone(&self.stats),
                        );
                        tracing::info!("Connection from {} -> session {}", peer, session.id());

                        let mut stop_rx = stop_rx.clone();
                        sessions.spawn(async move {
                            let mut transport = LineTransport::from_tcp(stream);
                            let stopped = async move {
                                let _ = stop_rx.wait_for(|stop| *stop).await;
                            };
                            session.run_until(&mut transport, stopped).await
                        });
                    }
                    Err(e) => accept_backoff(&e).await,
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_end(joined);
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        let _ = stop_tx.send(true);
        if !sessions.is_empty() {
            tracing::info!("Waiting for {} open sessions to close", sessions.len());
        }
        while let Some(joined) = sessions.join_next().await {
            log_session_end(joined);
        }

        let snapshot = self.stats.snapshot();
        tracing::info!(
            "Ingest server stopped: {} sessions, {} records persisted",
            snapshot.sessions_opened,
            snapshot.records_persisted
        );
        Ok(snapshot)
    }
}

async fn accept_backoff(error: &std::io::Error) {
    tracing::warn!(
        "Accept failed: {}; retrying in {:?}",
        error,
        ACCEPT_ERROR_BACKOFF
    );
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

fn log_session_end(
    joined: Result<crate::session::SessionOutcome, tokio::task::JoinError>,
) {
    match joined {
        Ok(outcome) if outcome.state == SessionState::Closed => {
            tracing::debug!(
                "Session {} closed ({} persisted)",
                outcome.session_id,
                outcome.persisted
            );
        }
        Ok(outcome) => {
            tracing::warn!(
                "Session {} errored: {}",
                outcome.session_id,
                outcome.response.message
            );
        }
        Err(e) => tracing::error!("Session task panicked: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = IngestConfig::builder().listen_addr("").build();
        let result = IngestServer::bind(config, Arc::new(MemoryStore::new())).await;
        assert!(matches!(result, Err(IngestError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_error_pauses_before_retry() {
        let start = tokio::time::Instant::now();
        let error = std::io::Error::from_raw_os_error(24);
        accept_backoff(&error).await;
        assert!(start.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn test_bind_rejects_oversized_buffer() {
        let config = IngestConfig::builder()
            .listen_addr("127.0.0.1:0")
            .buffer_capacity(usize::MAX)
            .build();
        let result = IngestServer::bind(config, Arc::new(MemoryStore::new())).await;
        assert!(matches!(result, Err(IngestError::Config(_))));
    }

    #[tokio::test]
    async fn test_idle_server_shuts_down() {
        let config = IngestConfig::builder().listen_addr("127.0.0.1:0").build();
        let server = IngestServer::bind(config, Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let snapshot = server.run_until(async {}).await.unwrap();
        assert_eq!(snapshot.sessions_opened, 0);
    }
}
