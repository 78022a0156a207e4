// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use datastream_ingest::TransportError;
use thiserror::Error;

/// Producer-side failures.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error: {0}")]
    Transport(#[from] TransportError),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Server rejected the stream: {0}")]
    Rejected(String),
}

impl From<std::io::Error> for ProducerError {
    fn from(e: std::io::Error) -> Self {
        ProducerError::Transport(TransportError::Io(e))
    }
}
