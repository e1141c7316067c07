// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters

//! Randomized checks of the acknowledgement and scheduling guarantees.
//!
//! Loss, duplication and reordering of control traffic are injected with a
//! seeded `fastrand::Rng` so failures are reproducible.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use hdds_reliable::{
    AckNackMsg, ChangeForReaderStatus, ChangeKind, FlowController, FlowControllerConfig,
    ReaderQos, SchedulingDiscipline, SequenceNumber, WriterConfig,
};

fn acknowledged(snap: &hdds_reliable::ReaderSnapshot, seq: SequenceNumber) -> bool {
    seq <= snap.low_water_mark
        || snap
            .records
            .iter()
            .find(|r| r.sequence_number() == seq)
            .is_some_and(|r| r.status() == ChangeForReaderStatus::Acknowledged || !r.is_relevant())
}

#[test]
fn test_acknowledgement_never_regresses() {
    for seed in [7u64, 42, 1234] {
        let mut rng = fastrand::Rng::with_seed(seed);
        let writer = build_writer(quiet_config(), GatedTransport::new(), sync_flow());
        let reader = reader_guid(1);
        writer.match_reader(reader, ReaderQos::reliable()).expect("match");

        let total: SequenceNumber = 60;
        for _ in 0..total {
            writer.write(ChangeKind::Alive, vec![0; 16]).expect("write");
        }

        // The reader receives samples over time and reports what it misses;
        // its messages get duplicated and reordered on the way back.
        let mut received = vec![false; total as usize + 2];
        let mut acks = Vec::new();
        for count in 1..=40u32 {
            for seq in 1..=total {
                if rng.u8(0..5) == 0 {
                    received[seq as usize] = true;
                }
            }
            let base = (1..=total)
                .find(|s| !received[*s as usize])
                .unwrap_or(total + 1);
            let missing: Vec<SequenceNumber> = (base..(base + 16).min(total + 1))
                .filter(|s| !received[*s as usize])
                .collect();
            let msg = AckNackMsg::nack(reader, writer_guid(), base, &missing, count).expect("nack");
            acks.push(msg);
            if rng.u8(0..4) == 0 {
                acks.push(msg);
            }
        }
        rng.shuffle(&mut acks);

        let mut seen_acked = vec![false; total as usize + 1];
        for msg in &acks {
            writer.on_acknack(msg);
            let snap = writer.reader_snapshot(reader).expect("snapshot");
            for seq in 1..=total {
                let now = acknowledged(&snap, seq);
                assert!(
                    now || !seen_acked[seq as usize],
                    "seed {}: seq {} regressed after count {}",
                    seed,
                    seq,
                    msg.count
                );
                seen_acked[seq as usize] |= now;
            }
        }
    }
}

#[test]
fn test_duplicate_nack_resends_once() {
    let transport = GatedTransport::new();
    let flow = sync_flow();
    let writer = build_writer(quiet_config(), transport.clone(), flow.clone());
    let reader = reader_guid(1);
    writer.match_reader(reader, ReaderQos::reliable()).expect("match");
    for _ in 0..5 {
        writer.write(ChangeKind::Alive, vec![0; 16]).expect("write");
    }

    let nack = AckNackMsg::nack(reader, writer_guid(), 3, &[3], 2).expect("nack");
    writer.on_acknack(&nack);
    writer.on_acknack(&nack);
    writer.on_acknack(&nack);
    assert_eq!(flow.metrics().submitted_resend, 1);
    assert_eq!(
        transport.data_sequences().iter().filter(|s| **s == 3).count(),
        2,
        "initial send + one resend"
    );

    // Next request cycle
    let again = AckNackMsg::nack(reader, writer_guid(), 3, &[3], 3).expect("nack");
    writer.on_acknack(&again);
    assert_eq!(flow.metrics().submitted_resend, 2);
}

#[test]
fn test_records_bounded_by_unacknowledged_window() {
    let mut rng = fastrand::Rng::with_seed(99);
    let writer = build_writer(quiet_config(), GatedTransport::new(), sync_flow());
    let reader = reader_guid(1);
    writer.match_reader(reader, ReaderQos::reliable()).expect("match");

    let mut count = 0u32;
    let mut base: SequenceNumber = 1;
    let mut max_records = 0usize;
    for _ in 0..500 {
        writer.write(ChangeKind::Alive, vec![0; 8]).expect("write");
        let last = writer.last_sequence();
        // Acknowledgements keep pace, with some lag
        if rng.u8(0..3) == 0 {
            count += 1;
            base = base.max(last + 1 - rng.u64(0..4).min(last));
            writer.on_acknack(&AckNackMsg::ack(reader, writer_guid(), base, count));
        }
        let snap = writer.reader_snapshot(reader).expect("snapshot");
        assert_eq!(
            snap.records.len() as u64,
            snap.highest_added - snap.low_water_mark,
            "records cover exactly the unacknowledged window"
        );
        max_records = max_records.max(snap.records.len());
    }
    assert!(max_records < 100, "window stayed small: {}", max_records);
}

#[test]
fn test_single_destination_order_preserved() {
    let transport = GatedTransport::new();
    let flow = Arc::new(
        FlowController::new(FlowControllerConfig::asynchronous(
            "ordered",
            SchedulingDiscipline::Fifo,
        ))
        .expect("flow"),
    );
    let writer = build_writer(quiet_config(), transport.clone(), flow.clone());
    let reader = reader_guid(1);
    writer.match_reader(reader, ReaderQos::reliable()).expect("match");
    for _ in 0..3 {
        writer.write(ChangeKind::Alive, vec![0; 8]).expect("write");
    }
    assert!(eventually(Duration::from_secs(2), || flow.pending_count() == 0));

    transport.close();
    transport.clear();
    writer.write(ChangeKind::Alive, vec![0; 8]).expect("write 4");
    writer.write(ChangeKind::Alive, vec![0; 8]).expect("write 5");
    writer.on_acknack(&AckNackMsg::nack(reader, writer_guid(), 1, &[1], 1).expect("nack"));
    writer.write(ChangeKind::Alive, vec![0; 8]).expect("write 6");
    writer.on_acknack(&AckNackMsg::nack(reader, writer_guid(), 1, &[1, 2], 2).expect("nack"));

    transport.open();
    flow.trigger();
    assert!(eventually(Duration::from_secs(2), || flow.pending_count() == 0));
    assert_eq!(transport.data_sequences(), vec![4, 5, 1, 6, 2]);
}

#[test]
fn test_bandwidth_cap_respected() {
    const SAMPLE: usize = 300;
    const BUDGET: usize = 1000;
    const PERIOD: Duration = Duration::from_millis(50);

    let transport = GatedTransport::new();
    let flow = Arc::new(
        FlowController::new(FlowControllerConfig::bandwidth_limited(
            "capped",
            SchedulingDiscipline::Fifo,
            BUDGET,
            PERIOD,
        ))
        .expect("flow"),
    );
    let writer = build_writer(
        WriterConfig {
            fragment_size: 4096,
            ..quiet_config()
        },
        transport.clone(),
        flow.clone(),
    );
    writer.match_reader(reader_guid(1), ReaderQos::reliable()).expect("match");

    let start = Instant::now();
    for _ in 0..20 {
        writer.write(ChangeKind::Alive, vec![0; SAMPLE]).expect("write");
    }
    assert!(eventually(Duration::from_secs(5), || flow.pending_count() == 0));
    let elapsed = start.elapsed();

    let sent = transport.sent();
    let total: usize = sent.iter().map(|s| s.message.payload_len()).sum();
    assert_eq!(total, 20 * SAMPLE);
    // 6000 bytes at 1000 bytes per period need at least five period resets
    assert!(elapsed >= PERIOD * 4, "finished too fast: {:?}", elapsed);
    assert!(flow.metrics().budget_deferrals > 0);

    // Within any span shorter than one period, at most one period boundary is
    // crossed: two budgets plus one in-flight sample.
    for (i, first) in sent.iter().enumerate() {
        let window: usize = sent[i..]
            .iter()
            .take_while(|s| s.at.duration_since(first.at) < PERIOD)
            .map(|s| s.message.payload_len())
            .sum();
        assert!(window <= 2 * BUDGET + SAMPLE, "window {} bytes", window);
    }
}
