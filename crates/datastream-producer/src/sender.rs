// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound stream sender
//!
//! Streams generated cycles to the ingest server over one long-lived
//! connection. A failed connect or send drops the connection, waits with
//! exponential backoff and resends the whole cycle on a fresh connection (a
//! new server-side session). Retries are bounded; exhausting them ends the run
//! with an error. Cancelling during a reconnect ends the run cleanly.
//!
//! Delivery across a reconnect is at-least-once: records of a cycle that
//! reached the old session before the failure may be stored twice, once per
//! session.

use crate::config::ProducerConfig;
use crate::error::ProducerError;
use crate::generator::SensorGenerator;
use chrono::Utc;
use datastream_ingest::{StreamRequest, StreamResponse, TransportError, WireRecord};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// One open client stream.
pub struct StreamConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl StreamConnection {
    pub async fn connect(addr: &str) -> Result<Self, ProducerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ProducerError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer: BufWriter::new(writer),
        })
    }

    /// Write `records` and flush them to the socket.
    pub async fn send_batch(&mut self, records: &[WireRecord]) -> Result<(), ProducerError> {
        for record in records {
            let request = StreamRequest {
                data: record.clone(),
            };
            let mut frame = serde_json::to_vec(&request).map_err(TransportError::from)?;
            frame.push(b'\n');
            self.writer.write_all(&frame).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Half-close the stream and wait for the server's single response.
    pub async fn finish(mut self) -> Result<StreamResponse, ProducerError> {
        self.writer.shutdown().await?;

        match self.lines.next_line().await? {
            Some(line) => {
                let response = serde_json::from_str(&line).map_err(TransportError::from)?;
                Ok(response)
            }
            None => Err(TransportError::Closed.into()),
        }
    }
}

/// Summary of a producer run.
#[derive(Debug, Clone, Default)]
pub struct ProducerReport {
    /// Cycles fully written
    pub cycles: u64,
    /// Records written across all connections
    pub records_sent: u64,
    /// Connections re-established after a failure
    pub reconnects: u32,
    /// Terminal response of the last connection
    pub response: Option<StreamResponse>,
}

enum CycleOutcome {
    Sent,
    Cancelled,
}

/// Resolves once `cancel` is `true`. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// `None` if cancelled before the connection was established.
async fn connect_or_cancel(
    addr: &str,
    cancel: &mut watch::Receiver<bool>,
) -> Option<Result<StreamConnection, ProducerError>> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => None,
        result = StreamConnection::connect(addr) => Some(result),
    }
}

/// Generator-driven stream sender
pub struct StreamSender {
    config: ProducerConfig,
    generator: SensorGenerator,
    conn: Option<StreamConnection>,
    report: ProducerReport,
}

impl StreamSender {
    pub fn new(config: ProducerConfig) -> Self {
        Self::with_generator(config, SensorGenerator::new())
    }

    pub fn with_generator(config: ProducerConfig, generator: SensorGenerator) -> Self {
        Self {
            config,
            generator,
            conn: None,
            report: ProducerReport::default(),
        }
    }

    /// Generate and stream until `cancel` flips to `true` or the configured
    /// number of cycles is reached, then close the stream and read the ack.
    pub async fn run(
        mut self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ProducerReport, ProducerError> {
        let mut ticker = tokio::time::interval(self.config.cadence());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Streaming to {} every {:?}",
            self.config.server_addr,
            self.config.cadence()
        );

        loop {
            if let Some(limit) = self.config.cycles {
                if self.report.cycles >= limit {
                    break;
                }
            }

            tokio::select! {
                biased;
                Ok(()) = cancel.changed() => {
                    if *cancel.borrow_and_update() {
                        tracing::info!("Cancelled after {} cycles", self.report.cycles);
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let cycle = self.generator.cycle(Utc::now());
            if let CycleOutcome::Cancelled = self.send_cycle(&cycle, &mut cancel).await? {
                tracing::info!(
                    "Cancelled while reconnecting after {} cycles",
                    self.report.cycles
                );
                break;
            }
            self.report.cycles += 1;
            tracing::debug!("Cycle {} sent ({} records)", self.report.cycles, cycle.len());
        }

        self.finish().await
    }

    /// Write one cycle, reconnecting with backoff on failure. Cancellation is
    /// honoured while connecting and while waiting between attempts.
    async fn send_cycle(
        &mut self,
        cycle: &[WireRecord],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, ProducerError> {
        let mut attempt = 0u32;

        loop {
            let result = match self.conn.as_mut() {
                Some(conn) => conn.send_batch(cycle).await,
                None => match connect_or_cancel(&self.config.server_addr, cancel).await {
                    None => return Ok(CycleOutcome::Cancelled),
                    Some(Err(e)) => Err(e),
                    Some(Ok(conn)) => {
                        if attempt > 0 {
                            self.report.reconnects += 1;
                            tracing::info!("Reconnected to {}", self.config.server_addr);
                        }
                        self.conn.insert(conn).send_batch(cycle).await
                    }
                },
            };

            let error = match result {
                Ok(()) => {
                    self.report.records_sent += cycle.len() as u64;
                    return Ok(CycleOutcome::Sent);
                }
                Err(e) => e,
            };

            self.conn = None;
            attempt += 1;
            if attempt > self.config.max_retries {
                tracing::error!("Giving up after {} attempts: {}", attempt, error);
                return Err(ProducerError::RetriesExhausted {
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            let delay = self.config.backoff(attempt);
            tracing::warn!(
                "Send failed ({}), retry {}/{} in {:?}",
                error,
                attempt,
                self.config.max_retries,
                delay
            );
            tokio::select! {
                biased;
                _ = cancelled(cancel) => return Ok(CycleOutcome::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn finish(mut self) -> Result<ProducerReport, ProducerError> {
        let Some(conn) = self.conn.take() else {
            return Ok(self.report);
        };

        let response = conn.finish().await?;
        tracing::info!(
            "Server response: {:?} ({}), {} persisted",
            response.status,
            response.message,
            response.persisted
        );

        if !response.is_ok() {
            return Err(ProducerError::Rejected(response.message));
        }
        self.report.response = Some(response);
        Ok(self.report)
    }
}
