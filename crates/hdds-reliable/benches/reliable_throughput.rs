// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable Writer Throughput Benchmark
//!
//! Measures the writer hot paths over the in-process loopback transport:
//! - write() with 1 and 4 matched reliable readers
//! - write() + full acknowledgement round (ACKNACK processing)
//! - selective NACK handling with immediate resend

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hdds_reliable::{
    AckNackMsg, ChangeKind, ChannelTransport, FlowController, FlowControllerConfig, Guid,
    PublishMode, ReaderQos, ReliableWriter, WriterConfig,
};
use std::hint::black_box as bb;
use std::sync::Arc;
use std::time::Duration;

fn writer_guid() -> Guid {
    Guid::new([0x01; 12], [0x00, 0x00, 0x01, 0x02])
}

fn reader_guid(n: u8) -> Guid {
    Guid::new([0x10 + n; 12], [0x00, 0x00, 0x01, 0x07])
}

/// Writer with `readers` reliable readers; the loopback channel is drained by
/// a background thread.
fn setup(readers: u8) -> ReliableWriter {
    let (transport, rx) = ChannelTransport::bounded(65_536);
    std::thread::spawn(move || while rx.recv().is_ok() {});

    let flow = FlowController::new(FlowControllerConfig {
        name: "bench".into(),
        publish_mode: PublishMode::PureSync,
        ..FlowControllerConfig::default()
    })
    .expect("flow controller");
    let config = WriterConfig {
        heartbeat_period: Duration::ZERO,
        nack_response_delay: Duration::ZERO,
        ..WriterConfig::default()
    };
    let writer = ReliableWriter::builder(writer_guid())
        .config(config)
        .transport(Arc::new(transport))
        .flow_controller(Arc::new(flow))
        .build()
        .expect("writer");
    for n in 0..readers {
        writer
            .match_reader(reader_guid(n), ReaderQos::reliable())
            .expect("match");
    }
    writer
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("reliable_write");

    for &(readers, size) in &[(1u8, 64usize), (1, 1024), (4, 64), (4, 1024)] {
        let writer = setup(readers);
        let payload = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("{}_readers", readers), size),
            &payload,
            |b, payload| {
                b.iter(|| {
                    // KEEP_LAST(100) evicts, so memory stays flat
                    bb(writer
                        .write(ChangeKind::Alive, payload.clone())
                        .expect("write"));
                });
            },
        );
    }

    group.finish();
}

fn bench_write_and_ack(c: &mut Criterion) {
    let mut group = c.benchmark_group("reliable_write_ack");
    let writer = setup(4);
    let mut count = 0u32;

    group.bench_function("write_ack_4_readers_256b", |b| {
        b.iter(|| {
            let seq = writer
                .write(ChangeKind::Alive, vec![0xCD; 256])
                .expect("write");
            count += 1;
            for n in 0..4 {
                writer.on_acknack(&AckNackMsg::ack(reader_guid(n), writer_guid(), seq + 1, count));
            }
            bb(writer.is_acked_by_all(seq));
        });
    });

    group.finish();
}

fn bench_nack_resend(c: &mut Criterion) {
    let mut group = c.benchmark_group("reliable_nack");
    let writer = setup(1);
    for _ in 0..64 {
        writer
            .write(ChangeKind::Alive, vec![0xEF; 256])
            .expect("write");
    }
    let base = writer.last_sequence() - 63;
    let missing: Vec<u64> = (base..base + 64).step_by(4).collect();
    let mut count = 0u32;

    group.bench_function("nack_16_of_64", |b| {
        b.iter(|| {
            count += 1;
            let nack = AckNackMsg::nack(reader_guid(0), writer_guid(), base, &missing, count)
                .expect("nack");
            writer.on_acknack(bb(&nack));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_write, bench_write_and_ack, bench_nack_resend);
criterion_main!(benches);
