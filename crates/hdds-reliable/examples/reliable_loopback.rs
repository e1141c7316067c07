// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Example code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Example parameters
#![allow(clippy::cast_precision_loss)] // Stats display

/// Reliable Loopback Example
///
/// Demonstrates:
/// - Building a ReliableWriter over the in-process ChannelTransport
/// - A simulated reliable reader that drops 20% of DATA
/// - HEARTBEAT / ACKNACK driven repair until every sample is acknowledged
///
/// Run with `RUST_LOG=debug` to follow the protocol.
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::RecvTimeoutError;
use hdds_reliable::reliability::MAX_BITMAP_BITS;
use hdds_reliable::{
    AckNackMsg, ChangeKind, ChannelTransport, FlowController, FlowControllerConfig, Guid,
    HeartbeatMsg, ReaderQos, ReliableWriter, SchedulingDiscipline, SequenceNumber, Submessage,
    WriterConfig,
};

const SAMPLES: u64 = 200;
const LOSS_PERCENT: u8 = 20;

/// Reader-side bookkeeping: what arrived and the ACKNACK counter.
struct SimulatedReader {
    guid: Guid,
    received: BTreeSet<SequenceNumber>,
    count: u32,
}

impl SimulatedReader {
    fn answer(&mut self, hb: &HeartbeatMsg) -> Option<AckNackMsg> {
        // Anything below first_seq is gone from the writer
        for seq in 1..hb.first_seq {
            self.received.insert(seq);
        }
        let base = (1..=hb.last_seq)
            .find(|s| !self.received.contains(s))
            .unwrap_or(hb.last_seq + 1);
        let window_end = (base + u64::from(MAX_BITMAP_BITS)).min(hb.last_seq + 1);
        let missing: Vec<SequenceNumber> = (base..window_end)
            .filter(|s| !self.received.contains(s))
            .collect();

        self.count += 1;
        if missing.is_empty() {
            return Some(AckNackMsg::ack(self.guid, hb.writer_guid, base, self.count));
        }
        AckNackMsg::nack(self.guid, hb.writer_guid, base, &missing, self.count)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("=== hdds-reliable loopback example ===\n");

    let (transport, rx) = ChannelTransport::bounded(4096);
    let transport = Arc::new(transport);
    let flow = Arc::new(FlowController::new(FlowControllerConfig::asynchronous(
        "loopback",
        SchedulingDiscipline::Fifo,
    ))?);

    let writer_guid = Guid::new([0x01; 12], [0x00, 0x00, 0x01, 0x02]);
    let reader_guid = Guid::new([0x02; 12], [0x00, 0x00, 0x01, 0x07]);

    let config = WriterConfig {
        heartbeat_period: Duration::from_millis(20),
        nack_response_delay: Duration::from_millis(2),
        ..WriterConfig::default()
    };
    let writer = Arc::new(
        ReliableWriter::builder(writer_guid)
            .config(config)
            .transport(transport.clone())
            .flow_controller(flow.clone())
            .build()?,
    );
    writer.match_reader(reader_guid, ReaderQos::reliable())?;
    println!("[OK] Writer {} matched reader {}", writer_guid, reader_guid);

    // Reader thread: consumes the loopback channel, drops some DATA, answers
    // heartbeats.
    let reader_writer = Arc::clone(&writer);
    let reader = thread::spawn(move || {
        let mut state = SimulatedReader {
            guid: reader_guid,
            received: BTreeSet::new(),
            count: 0,
        };
        let mut dropped = 0u64;
        loop {
            let outbound = match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(outbound) => outbound,
                Err(RecvTimeoutError::Timeout) => {
                    if reader_writer.is_acked_by_all(SAMPLES) {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match outbound.message {
                Submessage::Data(data) => {
                    if fastrand::u8(0..100) < LOSS_PERCENT {
                        dropped += 1;
                        continue;
                    }
                    state.received.insert(data.sequence_number());
                }
                Submessage::DataFrag(_) => {}
                Submessage::Gap(gap) => {
                    state.received.extend(gap.lost_sequences());
                }
                Submessage::Heartbeat(hb) => {
                    if let Some(acknack) = state.answer(&hb) {
                        reader_writer.on_acknack(&acknack);
                    }
                }
            }
        }
        dropped
    });

    for i in 0..SAMPLES {
        let payload = format!("sample #{}", i).into_bytes();
        writer.write(ChangeKind::Alive, payload)?;
    }
    println!("[OK] Wrote {} samples", SAMPLES);

    writer.wait_for_all_acknowledged(Some(Duration::from_secs(10)))?;
    println!("[OK] All samples acknowledged");

    let dropped = reader.join().map_err(|_| "reader thread panicked")?;
    let metrics = writer.metrics();
    let stats = transport.stats();
    println!("\n--- Statistics ---");
    println!("DATA dropped by reader : {}", dropped);
    println!("DATA sent              : {}", metrics.data_sent);
    println!("  of which resends     : {}", metrics.retransmit_sent);
    println!("HEARTBEATs sent        : {}", metrics.heartbeats_sent);
    println!("ACKNACKs processed     : {}", metrics.acknacks_received);
    println!("Channel back-pressure  : {}", stats.would_block);
    println!(
        "Resend overhead        : {:.1}%",
        metrics.retransmit_sent as f64 * 100.0 / SAMPLES as f64
    );
    Ok(())
}
