// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk SQLite backend: atomic batches, idempotent retries, durability.

use chrono::{TimeZone, Utc};
use datastream_ingest::{
    BatchWriter, IngestStats, Reading, Record, RecordStore, SqliteStore, WireRecord,
};
use std::sync::Arc;
use tempfile::TempDir;

fn record(seq: u64, sensor_type: &str) -> Record {
    let wire = WireRecord {
        value: 21.5,
        sensor_type: sensor_type.to_string(),
        source_id: "room-101".to_string(),
        sub_id: 1,
        observed_at: Some(format!("2025-03-01T10:00:{:02}Z", seq % 60)),
    };
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 5, 0).unwrap();
    Reading::from_wire(wire, now)
        .0
        .into_record(Arc::from("disk-session"), seq, now)
}

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::new(dir.path().join("ingest.db")).unwrap()
}

#[test]
fn batch_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        let batch: Vec<Record> = (0..10).map(|seq| record(seq, "temperature")).collect();
        assert_eq!(store.insert_many(&batch).unwrap(), 10);
    }

    let store = open(&dir);
    assert_eq!(store.count().unwrap(), 10);
    let loaded = store.load_session("disk-session").unwrap();
    assert_eq!(loaded[9].sequence(), 9);
    assert_eq!(loaded[9].observed_at_ns(), record(9, "temperature").observed_at_ns());
}

#[test]
fn one_bad_record_rolls_back_the_batch() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut batch: Vec<Record> = (0..5).map(|seq| record(seq, "humidity")).collect();
    batch.push(record(5, ""));
    assert!(store.insert_many(&batch).is_err());
    assert_eq!(store.count().unwrap(), 0);

    // The good prefix still goes in once the bad record is gone.
    batch.pop();
    assert_eq!(store.insert_many(&batch).unwrap(), 5);
}

#[test]
fn retried_batch_is_not_duplicated() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let first: Vec<Record> = (0..3).map(|seq| record(seq, "co2")).collect();
    assert_eq!(store.insert_many(&first).unwrap(), 3);

    let retry: Vec<Record> = (0..5).map(|seq| record(seq, "co2")).collect();
    assert_eq!(store.insert_many(&retry).unwrap(), 2);
    assert_eq!(store.count().unwrap(), 5);
}

#[tokio::test]
async fn writer_commits_through_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir));
    let stats = Arc::new(IngestStats::new());
    let writer = BatchWriter::new(Arc::clone(&store), Arc::clone(&stats));

    let batch: Vec<Record> = (0..4).map(|seq| record(seq, "light")).collect();
    assert_eq!(writer.write(batch).await.unwrap(), 4);

    let failure = writer
        .write(vec![record(10, "light"), record(11, "")])
        .await
        .unwrap_err();
    assert_eq!(failure.batch.len(), 2);
    assert_eq!(store.count().unwrap(), 4);

    let snap = stats.snapshot();
    assert_eq!(snap.batches_written, 1);
    assert_eq!(snap.flush_failures, 1);
}
