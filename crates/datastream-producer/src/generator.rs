// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synthetic sensor readings
//!
//! Every cycle yields one reading per channel, in the fixed order of
//! [`CHANNELS`], all sharing a single observation timestamp.

use chrono::{DateTime, SecondsFormat, Utc};
use datastream_ingest::WireRecord;
use std::ops::RangeInclusive;

/// How a channel's value is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRange {
    /// Uniform in `[min, min + span)`
    Uniform { min: f64, span: f64 },
    /// 0.0 or 1.0
    Binary,
}

/// One simulated sensor stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub sensor_type: &'static str,
    pub source_id: &'static str,
    pub values: ValueRange,
    pub sub_ids: RangeInclusive<i32>,
}

/// The six channels, in emission order.
pub const CHANNELS: [Channel; 6] = [
    Channel {
        sensor_type: "temperature",
        source_id: "room-101",
        values: ValueRange::Uniform { min: 18.0, span: 12.0 },
        sub_ids: 1..=3,
    },
    Channel {
        sensor_type: "humidity",
        source_id: "room-102",
        values: ValueRange::Uniform { min: 30.0, span: 40.0 },
        sub_ids: 1..=2,
    },
    Channel {
        sensor_type: "co2",
        source_id: "meeting-room-A",
        values: ValueRange::Uniform { min: 400.0, span: 1600.0 },
        sub_ids: 1..=1,
    },
    Channel {
        sensor_type: "motion",
        source_id: "corridor-1",
        values: ValueRange::Binary,
        sub_ids: 1..=5,
    },
    Channel {
        sensor_type: "light",
        source_id: "room-101",
        values: ValueRange::Uniform { min: 100.0, span: 900.0 },
        sub_ids: 1..=2,
    },
    Channel {
        sensor_type: "noise",
        source_id: "cafeteria",
        values: ValueRange::Uniform { min: 30.0, span: 70.0 },
        sub_ids: 1..=1,
    },
];

/// Reading generator
pub struct SensorGenerator {
    rng: fastrand::Rng,
}

impl Default for SensorGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorGenerator {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    /// Deterministic generator.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// One reading per channel, all observed at `now`.
    pub fn cycle(&mut self, now: DateTime<Utc>) -> Vec<WireRecord> {
        let observed_at = now.to_rfc3339_opts(SecondsFormat::Nanos, true);

        CHANNELS
            .iter()
            .map(|channel| WireRecord {
                value: self.value(channel.values),
                sensor_type: channel.sensor_type.to_string(),
                source_id: channel.source_id.to_string(),
                sub_id: self.rng.i32(channel.sub_ids.clone()),
                observed_at: Some(observed_at.clone()),
            })
            .collect()
    }

    fn value(&mut self, range: ValueRange) -> f64 {
        match range {
            ValueRange::Uniform { min, span } => min + self.rng.f64() * span,
            ValueRange::Binary => f64::from(self.rng.u8(0..=1)),
        }
    }
}
