// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RecordBuffer under concurrent appenders and a draining flusher.

use chrono::Utc;
use datastream_ingest::{Reading, Record, RecordBuffer, WireRecord};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn record(producer: usize, seq: u64) -> Record {
    let wire = WireRecord {
        value: seq as f64,
        sensor_type: "temperature".to_string(),
        source_id: format!("producer-{}", producer),
        sub_id: 1,
        observed_at: None,
    };
    let now = Utc::now();
    Reading::from_wire(wire, now)
        .0
        .into_record(Arc::from(format!("p{}", producer)), seq, now)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every appended record comes out of exactly one drain, and each
    /// appender's records come out in the order it appended them.
    #[test]
    fn drains_lose_and_duplicate_nothing(
        per_producer in proptest::collection::vec(0u64..200, 1..5),
        drains in 0usize..50,
        requeue_every in 0usize..4,
    ) {
        let buffer = Arc::new(RecordBuffer::new());

        let appenders: Vec<_> = per_producer
            .iter()
            .enumerate()
            .map(|(producer, &count)| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for seq in 0..count {
                        buffer.append(record(producer, seq));
                    }
                })
            })
            .collect();

        let flusher = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut drained = Vec::new();
                for i in 0..drains {
                    let batch = buffer.drain_all();
                    // Simulate a failed write now and then.
                    if requeue_every > 0 && i % requeue_every == 0 {
                        buffer.requeue_front(batch);
                    } else {
                        drained.extend(batch);
                    }
                    thread::yield_now();
                }
                drained
            })
        };

        for handle in appenders {
            handle.join().unwrap();
        }
        let mut seen = flusher.join().unwrap();
        seen.extend(buffer.drain_all());
        prop_assert!(buffer.is_empty());

        let total: u64 = per_producer.iter().sum();
        prop_assert_eq!(seen.len() as u64, total);

        let keys: HashSet<(String, u64)> = seen
            .iter()
            .map(|r| (r.session_id().to_string(), r.sequence()))
            .collect();
        prop_assert_eq!(keys.len(), seen.len());

        for (producer, _) in per_producer.iter().enumerate() {
            let session = format!("p{}", producer);
            let seqs: Vec<u64> = seen
                .iter()
                .filter(|r| r.session_id() == session)
                .map(Record::sequence)
                .collect();
            let mut sorted = seqs.clone();
            sorted.sort_unstable();
            prop_assert_eq!(seqs, sorted);
        }
    }
}
