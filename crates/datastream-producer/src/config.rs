// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producer configuration

use std::time::Duration;

/// Producer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Ingest server address
    pub server_addr: String,

    /// Pause between two generation cycles
    pub cadence_ms: u64,

    /// Reconnect attempts per cycle before giving up
    pub max_retries: u32,

    /// First reconnect delay; doubles on every further attempt
    pub backoff_initial_ms: u64,

    /// Upper bound on the reconnect delay
    pub backoff_max_ms: u64,

    /// Stop after this many cycles (`None` = run until cancelled)
    pub cycles: Option<u64>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:50051".to_string(),
            cadence_ms: 1000,
            max_retries: 5,
            backoff_initial_ms: 200,
            backoff_max_ms: 5000,
            cycles: None,
        }
    }
}

impl ProducerConfig {
    /// Create a new config builder
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::default()
    }

    pub fn cadence(&self) -> Duration {
        // A zero period would make `tokio::time::interval` panic.
        Duration::from_millis(self.cadence_ms.max(1))
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .backoff_initial_ms
            .saturating_mul(1u64 << shift)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    /// Set ingest server address, e.g. "127.0.0.1:50051"
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server_addr = addr.into();
        self
    }

    /// Set generation period
    pub fn cadence(mut self, cadence: Duration) -> Self {
        self.config.cadence_ms = cadence.as_millis() as u64;
        self
    }

    /// Set reconnect attempts per cycle
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set reconnect backoff bounds
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.backoff_initial_ms = initial.as_millis() as u64;
        self.config.backoff_max_ms = max.as_millis() as u64;
        self
    }

    /// Stop after `cycles` generation cycles
    pub fn cycles(mut self, cycles: u64) -> Self {
        self.config.cycles = Some(cycles);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ProducerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_defaults() {
        let config = ProducerConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1:50051");
        assert_eq!(config.cadence(), Duration::from_secs(1));
        assert_eq!(config.cycles, None);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = ProducerConfig::builder()
            .backoff(Duration::from_millis(100), Duration::from_millis(500))
            .build();

        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
        assert_eq!(config.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_cadence_is_clamped() {
        let config = ProducerConfig::builder().cadence(Duration::ZERO).build();
        assert_eq!(config.cadence(), Duration::from_millis(1));
    }
}
