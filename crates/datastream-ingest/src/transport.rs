// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound stream transports
//!
//! A stream session only needs two things from its transport: the next record
//! (or end-of-stream) and a way to deliver the single terminal response.
//!
//! # Implementations
//!
//! - [`LineTransport`] -- newline-delimited JSON over any async byte stream
//!   (TCP in the server)
//! - [`ChannelTransport`] -- in-process channels, for embedding and tests

use crate::error::TransportError;
use crate::protocol::{StreamRequest, StreamResponse};
use crate::record::WireRecord;
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Receiving side of one client-streaming call.
pub trait RecordStream: Send {
    /// Next record, or `None` once the producer has closed its side.
    ///
    /// Must be cancel-safe: the session polls it inside `select!`.
    fn next_record(
        &mut self,
    ) -> impl Future<Output = Result<Option<WireRecord>, TransportError>> + Send;

    /// Deliver the terminal response. Called at most once.
    fn send_response(
        &mut self,
        response: &StreamResponse,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Default upper bound on one inbound frame, newline excluded.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Newline-delimited JSON transport.
pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    // Partial frame, kept across cancelled reads.
    line: Vec<u8>,
    max_frame: usize,
    writer: W,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> LineTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
            max_frame: MAX_FRAME_BYTES,
            writer,
        }
    }

    /// Override the frame size limit.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Next newline-terminated frame without its line ending. A trailing
    /// unterminated frame is returned at end of input.
    ///
    /// Cancel-safe: bytes are only consumed from the reader once they have
    /// been moved into `self.line`.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let chunk = self.reader.fill_buf().await?;
            if chunk.is_empty() {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.line)));
            }

            let (used, complete) = match chunk.iter().position(|b| *b == b'\n') {
                Some(at) => (at + 1, true),
                None => (chunk.len(), false),
            };
            let content = used - usize::from(complete);
            if self.line.len() + content > self.max_frame {
                return Err(TransportError::FrameTooLong(self.max_frame));
            }

            self.line.extend_from_slice(&chunk[..content]);
            self.reader.consume(used);

            if complete {
                let mut frame = std::mem::take(&mut self.line);
                if frame.last() == Some(&b'\r') {
                    frame.pop();
                }
                return Ok(Some(frame));
            }
        }
    }
}

impl LineTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Split a TCP connection into a transport.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

impl<R, W> RecordStream for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn next_record(&mut self) -> Result<Option<WireRecord>, TransportError> {
        while let Some(frame) = self.read_frame().await? {
            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let request: StreamRequest = serde_json::from_slice(&frame)?;
            return Ok(Some(request.data));
        }
        Ok(None)
    }

    async fn send_response(&mut self, response: &StreamResponse) -> Result<(), TransportError> {
        let mut frame = serde_json::to_vec(response)?;
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// In-process transport fed by a [`ChannelProducer`].
pub struct ChannelTransport {
    rx: mpsc::Receiver<Result<WireRecord, TransportError>>,
    ack_tx: Option<oneshot::Sender<StreamResponse>>,
}

/// Producer half of a [`ChannelTransport`].
pub struct ChannelProducer {
    tx: mpsc::Sender<Result<WireRecord, TransportError>>,
    ack_rx: oneshot::Receiver<StreamResponse>,
}

/// Create a connected producer/transport pair.
pub fn channel_transport(capacity: usize) -> (ChannelProducer, ChannelTransport) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (ack_tx, ack_rx) = oneshot::channel();

    (
        ChannelProducer { tx, ack_rx },
        ChannelTransport {
            rx,
            ack_tx: Some(ack_tx),
        },
    )
}

impl ChannelProducer {
    /// Send one record.
    pub async fn send(&self, record: WireRecord) -> Result<(), TransportError> {
        self.tx
            .send(Ok(record))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Make the receiver observe a transport failure.
    pub async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        self.tx
            .send(Err(error))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Close the stream and wait for the terminal response.
    pub async fn finish(self) -> Result<StreamResponse, TransportError> {
        let Self { tx, ack_rx } = self;
        drop(tx);
        ack_rx.await.map_err(|_| TransportError::Closed)
    }

    /// Wait for the terminal response without closing the stream.
    pub async fn response(self) -> Result<StreamResponse, TransportError> {
        self.ack_rx.await.map_err(|_| TransportError::Closed)
    }
}

impl RecordStream for ChannelTransport {
    async fn next_record(&mut self) -> Result<Option<WireRecord>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn send_response(&mut self, response: &StreamResponse) -> Result<(), TransportError> {
        let ack_tx = self.ack_tx.take().ok_or(TransportError::Closed)?;
        ack_tx
            .send(response.clone())
            .map_err(|_| TransportError::Closed)
    }
}
