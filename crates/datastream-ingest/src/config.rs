// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingest service configuration
//!
//! Loaded from TOML or built programmatically:
//!
//! ```toml
//! listen_addr = "0.0.0.0:50051"
//! database = "datastream.db"
//! flush_interval_ms = 5000
//! failure_policy = "requeue"
//! max_flush_failures = 3
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest accepted `buffer_capacity`. Each session preallocates this many
/// slots, so an oversized value would be paid on every connection.
pub const MAX_BUFFER_CAPACITY: usize = 1 << 16;

/// What a scheduled flush does when the batch writer fails.
///
/// The failed batch is always pushed back into the buffer first; the policy
/// only decides whether the session keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Retry on the next tick, escalating after `max_flush_failures`
    /// consecutive failures.
    #[default]
    Requeue,
    /// End the session on the first failure.
    Escalate,
}

/// Ingest service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// TCP address the stream listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// SQLite database path
    #[serde(default = "default_database")]
    pub database: String,

    /// Scheduled flush period in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Reaction to a failed scheduled flush
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Consecutive failed flushes tolerated under `FailurePolicy::Requeue`
    #[serde(default = "default_max_flush_failures")]
    pub max_flush_failures: u32,

    /// Initial capacity of each session buffer, at most `MAX_BUFFER_CAPACITY`
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:50051".to_string()
}

fn default_database() -> String {
    "datastream.db".to_string()
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_max_flush_failures() -> u32 {
    3
}

fn default_buffer_capacity() -> usize {
    256
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database: default_database(),
            flush_interval_ms: default_flush_interval_ms(),
            failure_policy: FailurePolicy::default(),
            max_flush_failures: default_max_flush_failures(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl IngestConfig {
    /// Create a new config builder
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("listen_addr is empty".to_string()));
        }
        if self.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "buffer_capacity {} exceeds the maximum of {}",
                self.buffer_capacity, MAX_BUFFER_CAPACITY
            )));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    listen_addr: Option<String>,
    database: Option<String>,
    flush_interval: Option<Duration>,
    failure_policy: Option<FailurePolicy>,
    max_flush_failures: Option<u32>,
    buffer_capacity: Option<usize>,
}

impl IngestConfigBuilder {
    /// Set listen address, e.g. "127.0.0.1:50051"
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set SQLite database path
    pub fn database(mut self, path: impl Into<String>) -> Self {
        self.database = Some(path.into());
        self
    }

    /// Set scheduled flush period
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Set failed-flush policy
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Set consecutive failures tolerated before escalating
    pub fn max_flush_failures(mut self, max: u32) -> Self {
        self.max_flush_failures = Some(max);
        self
    }

    /// Set initial buffer capacity
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Build the configuration
    pub fn build(self) -> IngestConfig {
        let defaults = IngestConfig::default();

        IngestConfig {
            listen_addr: self.listen_addr.unwrap_or(defaults.listen_addr),
            database: self.database.unwrap_or(defaults.database),
            flush_interval_ms: self
                .flush_interval
                .map(|d| d.as_millis() as u64)
                .unwrap_or(defaults.flush_interval_ms),
            failure_policy: self.failure_policy.unwrap_or(defaults.failure_policy),
            max_flush_failures: self
                .max_flush_failures
                .unwrap_or(defaults.max_flush_failures),
            buffer_capacity: self.buffer_capacity.unwrap_or(defaults.buffer_capacity),
        }
    }
}
