// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastream Producer CLI
//!
//! # Usage
//!
//! ```bash
//! # Stream to a local ingest server every second
//! datastream-producer
//!
//! # Faster cadence, remote server, stop after 100 cycles
//! GEN_FREQ_MS=200 datastream-producer --server 10.0.0.5:50051 --cycles 100
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use datastream_producer::{ProducerConfig, StreamSender};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "datastream-producer")]
#[command(about = "Datastream Producer - synthetic sensor telemetry stream", long_about = None)]
struct Args {
    /// Ingest server address
    #[arg(short, long, env = "INGEST_ADDR", default_value = "127.0.0.1:50051")]
    server: String,

    /// Generation period in milliseconds
    #[arg(short, long, env = "GEN_FREQ_MS", default_value_t = 1000)]
    freq_ms: u64,

    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Reconnect attempts per cycle before giving up
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Initial reconnect backoff in milliseconds
    #[arg(long, default_value_t = 200)]
    backoff_ms: u64,

    /// Maximum reconnect backoff in milliseconds
    #[arg(long, default_value_t = 5000)]
    backoff_max_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut builder = ProducerConfig::builder()
        .server_addr(&args.server)
        .cadence(Duration::from_millis(args.freq_ms))
        .max_retries(args.max_retries)
        .backoff(
            Duration::from_millis(args.backoff_ms),
            Duration::from_millis(args.backoff_max_ms),
        );
    if let Some(cycles) = args.cycles {
        builder = builder.cycles(cycles);
    }
    let config = builder.build();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, closing stream");
            let _ = cancel_tx.send(true);
        }
    });

    let report = StreamSender::new(config)
        .run(cancel_rx)
        .await
        .with_context(|| format!("streaming to {}", args.server))?;

    tracing::info!(
        "Done: {} cycles, {} records sent, {} reconnects",
        report.cycles,
        report.records_sent,
        report.reconnects
    );
    Ok(())
}
