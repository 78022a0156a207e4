// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastream Ingest Service CLI
//!
//! Accepts telemetry streams and commits them to SQLite in timed batches.
//!
//! # Usage
//!
//! ```bash
//! # Run with default settings
//! datastream-ingest --db datastream.db
//!
//! # Flush every second, end a session on the first failed flush
//! datastream-ingest --flush-interval-ms 1000 --policy escalate
//!
//! # Show stored record counts / wipe the database
//! datastream-ingest stats
//! datastream-ingest clear --confirm
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datastream_ingest::{
    FailurePolicy, IngestConfig, IngestServer, MemoryStore, RecordStore, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "datastream-ingest")]
#[command(about = "Datastream Ingest Service - buffered batch persistence for telemetry streams", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:50051
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path (SQLite file)
    #[arg(short, long)]
    db: Option<String>,

    /// Scheduled flush period in milliseconds
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Reaction to a failed scheduled flush
    #[arg(long, value_enum)]
    policy: Option<FailurePolicy>,

    /// Consecutive failed flushes tolerated under the requeue policy
    #[arg(long)]
    max_flush_failures: Option<u32>,

    /// Keep records in memory instead of SQLite (for testing)
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept producer streams (default)
    Serve,
    /// Show stored record counts
    Stats {
        /// Only count records of this source
        #[arg(long)]
        source: Option<String>,
    },
    /// Clear all stored records
    Clear {
        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
}

impl Args {
    fn resolve_config(&self) -> Result<IngestConfig> {
        let mut config = match &self.config {
            Some(path) => IngestConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => IngestConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(db) = &self.db {
            config.database = db.clone();
        }
        if let Some(ms) = self.flush_interval_ms {
            config.flush_interval_ms = ms;
        }
        if let Some(policy) = self.policy {
            config.failure_policy = policy;
        }
        if let Some(max) = self.max_flush_failures {
            config.max_flush_failures = max;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
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
    let config = args.resolve_config()?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if args.memory {
                tracing::info!("Running with in-memory store");
                serve(config, Arc::new(MemoryStore::new())).await
            } else {
                let store = open_store(&config)?;
                serve(config, Arc::new(store)).await
            }
        }
        Commands::Stats { source } => show_stats(&open_store(&config)?, source),
        Commands::Clear { confirm } => clear(&open_store(&config)?, confirm),
    }
}

fn open_store(config: &IngestConfig) -> Result<SqliteStore> {
    SqliteStore::new(&config.database)
        .with_context(|| format!("opening database {}", config.database))
}

async fn serve<S: RecordStore + 'static>(config: IngestConfig, store: Arc<S>) -> Result<()> {
    tracing::info!("Datastream Ingest Service starting...");
    tracing::info!("  Database: {}", config.database);

    let server = IngestServer::bind(config.clone(), store)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    let stats = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;

    tracing::info!(
        "Sessions: {} opened, {} closed, {} errored",
        stats.sessions_opened,
        stats.sessions_closed,
        stats.sessions_errored
    );
    tracing::info!(
        "Records: {} received, {} persisted, {} unpersisted",
        stats.records_received,
        stats.records_persisted,
        stats.records_unpersisted
    );
    tracing::info!(
        "Flushes: {} batches, {} failures, {} re-queued",
        stats.batches_written,
        stats.flush_failures,
        stats.records_requeued
    );
    Ok(())
}

fn show_stats(store: &SqliteStore, source: Option<String>) -> Result<()> {
    match source {
        Some(source) => {
            let records = store.load_source(&source)?;
            println!("Records for source '{}': {}", source, records.len());
            if let (Some(first), Some(last)) = (records.first(), records.last()) {
                println!("  First observed: {}", first.observed_at().to_rfc3339());
                println!("  Last observed:  {}", last.observed_at().to_rfc3339());
            }
        }
        None => println!("Stored records: {}", store.count()?),
    }
    Ok(())
}

fn clear(store: &SqliteStore, confirm: bool) -> Result<()> {
    if !confirm {
        println!("Use --confirm to clear all stored records");
        return Ok(());
    }
    store.clear()?;
    println!("All records cleared");
    Ok(())
}
