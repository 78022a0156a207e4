// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastream Producer
//!
//! Synthetic telemetry source for `datastream-ingest`: six simulated sensor
//! channels, one cycle per cadence tick, streamed over a single long-lived
//! connection with bounded reconnects.
//!
//! # Example
//!
//! ```ignore
//! use datastream_producer::{ProducerConfig, StreamSender};
//!
//! let config = ProducerConfig::builder()
//!     .server_addr("127.0.0.1:50051")
//!     .cycles(10)
//!     .build();
//!
//! let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
//! let report = StreamSender::new(config).run(cancel_rx).await?;
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod sender;

pub use config::{ProducerConfig, ProducerConfigBuilder};
pub use error::ProducerError;
pub use generator::{Channel, SensorGenerator, ValueRange, CHANNELS};
pub use sender::{ProducerReport, StreamConnection, StreamSender};
