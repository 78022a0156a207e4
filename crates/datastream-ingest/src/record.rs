// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry record model
//!
//! A sample travels through two shapes:
//!
//! ```text
//! WireRecord --from_wire--> Reading --into_record--> Record
//! (producer)                (timestamp parsed)       (buffered, immutable)
//! ```
//!
//! `Record` has no mutation methods; once built it is appended to exactly one
//! batch and moved, never edited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// One telemetry sample as carried on the inbound stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    /// Measured value (no range check at this layer)
    pub value: f64,

    /// Short tag, e.g. "temperature"
    #[serde(rename = "type")]
    pub sensor_type: String,

    /// Emitting entity, e.g. "room-101"
    pub source_id: String,

    /// Unit number within the source
    pub sub_id: i32,

    /// RFC 3339 observation time; absent or empty means "unknown"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,
}

/// Why a producer timestamp could not be used.
#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("observation timestamp missing")]
    Missing,

    #[error("observation timestamp {raw:?} is not RFC 3339: {source}")]
    Invalid {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Parse a producer-supplied observation timestamp.
pub fn parse_observed_at(raw: Option<&str>) -> Result<DateTime<Utc>, TimestampError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Err(TimestampError::Missing),
        Some(raw) => raw,
    };

    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| TimestampError::Invalid {
            raw: raw.to_string(),
            source,
        })
}

/// Where a record's observation time came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    /// Parsed from the producer's `observed_at`
    Producer,
    /// Producer value missing or unparsable; receipt time substituted
    Defaulted,
}

impl TimestampSource {
    pub fn is_defaulted(self) -> bool {
        self == TimestampSource::Defaulted
    }
}

/// A wire record whose timestamp has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    value: f64,
    sensor_type: String,
    source_id: String,
    sub_id: i32,
    observed_at: DateTime<Utc>,
    timestamp_source: TimestampSource,
}

impl Reading {
    /// Build a reading from a wire message.
    ///
    /// When `observed_at` is missing or malformed, `now` is used instead and the
    /// reading is flagged [`TimestampSource::Defaulted`]. The parse error is
    /// handed back so the caller can log and count it.
    pub fn from_wire(wire: WireRecord, now: DateTime<Utc>) -> (Self, Option<TimestampError>) {
        let (observed_at, timestamp_source, error) =
            match parse_observed_at(wire.observed_at.as_deref()) {
                Ok(ts) => (ts, TimestampSource::Producer, None),
                Err(e) => (now, TimestampSource::Defaulted, Some(e)),
            };

        let reading = Self {
            value: wire.value,
            sensor_type: wire.sensor_type,
            source_id: wire.source_id,
            sub_id: wire.sub_id,
            observed_at,
            timestamp_source,
        };
        (reading, error)
    }

    pub fn timestamp_source(&self) -> TimestampSource {
        self.timestamp_source
    }

    /// Stamp the reading for storage.
    pub fn into_record(
        self,
        session_id: Arc<str>,
        sequence: u64,
        received_at: DateTime<Utc>,
    ) -> Record {
        Record {
            session_id,
            sequence,
            value: self.value,
            sensor_type: self.sensor_type,
            source_id: self.source_id,
            sub_id: self.sub_id,
            observed_at: self.observed_at,
            received_at,
            timestamp_source: self.timestamp_source,
        }
    }
}

/// A buffered telemetry sample, ready for storage.
///
/// `(session_id, sequence)` identifies the record uniquely; storage backends use
/// it to make retried batches idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    session_id: Arc<str>,
    sequence: u64,
    value: f64,
    sensor_type: String,
    source_id: String,
    sub_id: i32,
    observed_at: DateTime<Utc>,
    received_at: DateTime<Utc>,
    timestamp_source: TimestampSource,
}

impl Record {
    /// Rebuild a record read back from storage.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_stored(
        session_id: Arc<str>,
        sequence: u64,
        value: f64,
        sensor_type: String,
        source_id: String,
        sub_id: i32,
        observed_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
        timestamp_source: TimestampSource,
    ) -> Self {
        Self {
            session_id,
            sequence,
            value,
            sensor_type,
            source_id,
            sub_id,
            observed_at,
            received_at,
            timestamp_source,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn sensor_type(&self) -> &str {
        &self.sensor_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn sub_id(&self) -> i32 {
        self.sub_id
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn timestamp_source(&self) -> TimestampSource {
        self.timestamp_source
    }

    /// Observation time as Unix nanoseconds (saturating outside i64 range).
    pub fn observed_at_ns(&self) -> i64 {
        to_unix_nanos(self.observed_at)
    }

    /// Receipt time as Unix nanoseconds (saturating outside i64 range).
    pub fn received_at_ns(&self) -> i64 {
        to_unix_nanos(self.received_at)
    }
}

pub(crate) fn to_unix_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(if ts.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

pub(crate) fn from_unix_nanos(ns: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ns)
}
