// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the ingestion engine.

use thiserror::Error;

/// Stream read/write failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Frame exceeds {0} bytes")]
    FrameTooLong(usize),

    #[error("Peer closed the stream")]
    Closed,
}

/// Storage backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Batch rejected: {0}")]
    Rejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Session-level errors.
///
/// None of these are process-fatal: a failing session reports the error to its
/// producer and ends, other sessions keep running.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Persistence error: {records} records not stored: {source}")]
    Persistence {
        records: usize,
        #[source]
        source: StoreError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Flush task failed: {0}")]
    Task(String),

    #[error("Session is {0}, not accepting records")]
    NotAccepting(crate::session::SessionState),
}

impl IngestError {
    /// Number of records left unpersisted by this error, if any.
    pub fn unpersisted(&self) -> usize {
        match self {
            IngestError::Persistence { records, .. } => *records,
            _ => 0,
        }
    }

    /// Restate a persistence error with the count left after later flushes.
    /// Other errors are returned unchanged.
    pub(crate) fn with_unpersisted(self, remaining: usize) -> Self {
        match self {
            IngestError::Persistence { source, .. } => IngestError::Persistence {
                records: remaining,
                source,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_error_names_record_count() {
        let err = IngestError::Persistence {
            records: 12,
            source: StoreError::Rejected("constraint".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("12 records"), "{msg}");
        assert!(msg.contains("constraint"), "{msg}");
        assert_eq!(err.unpersisted(), 12);
    }

    #[test]
    fn persistence_count_is_restated() {
        let err = IngestError::Persistence {
            records: 4,
            source: StoreError::Unavailable("down".into()),
        }
        .with_unpersisted(0);
        assert_eq!(err.unpersisted(), 0);
        assert!(err.to_string().contains("0 records not stored"), "{err}");

        let other = IngestError::from(TransportError::Closed).with_unpersisted(3);
        assert!(matches!(other, IngestError::Transport(_)));
    }

    #[test]
    fn transport_error_is_not_persistence() {
        let err = IngestError::from(TransportError::Closed);
        assert_eq!(err.unpersisted(), 0);
    }
}
