// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdds_reliable::{
    FlowController, FlowControllerConfig, Guid, PublishMode, ReliableWriter, SequenceNumber,
    Submessage, Transport, WriterConfig, WriterListener,
};
use parking_lot::Mutex;

pub fn writer_guid() -> Guid {
    Guid::new([0x01; 12], [0x00, 0x00, 0x01, 0x02])
}

pub fn reader_guid(n: u8) -> Guid {
    Guid::new([0x10 + n; 12], [0x00, 0x00, 0x01, 0x07])
}

/// One captured send.
#[derive(Debug, Clone)]
pub struct Sent {
    pub message: Submessage,
    pub destinations: Vec<Guid>,
    pub at: Instant,
}

/// Transport recording every send; sends fail while the gate is closed.
#[derive(Debug, Default)]
pub struct GatedTransport {
    closed: AtomicBool,
    sent: Mutex<Vec<Sent>>,
}

impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Sequence numbers of the DATA submessages sent so far, in order.
    pub fn data_sequences(&self) -> Vec<SequenceNumber> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match &s.message {
                Submessage::Data(data) => Some(data.sequence_number()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.message.kind() == kind)
            .count()
    }
}

impl Transport for GatedTransport {
    fn send(&self, message: &Submessage, destinations: &[Guid]) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "gate closed"));
        }
        self.sent.lock().push(Sent {
            message: message.clone(),
            destinations: destinations.to_vec(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Listener recording every callback.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub matched: Mutex<Vec<Guid>>,
    pub unmatched: Mutex<Vec<Guid>>,
    pub acked: Mutex<Vec<SequenceNumber>>,
    pub removed: Mutex<Vec<(SequenceNumber, bool)>>,
}

impl WriterListener for RecordingListener {
    fn on_reader_matched(&self, reader: Guid, _qos: hdds_reliable::ReaderQos) {
        self.matched.lock().push(reader);
    }

    fn on_reader_unmatched(&self, reader: Guid) {
        self.unmatched.lock().push(reader);
    }

    fn on_acknowledged_by_all(&self, seq: SequenceNumber) {
        self.acked.lock().push(seq);
    }

    fn on_sample_removed(&self, seq: SequenceNumber, acknowledged: bool) {
        self.removed.lock().push((seq, acknowledged));
    }
}

/// Deterministic writer config: no periodic heartbeat, immediate NACK response.
pub fn quiet_config() -> WriterConfig {
    WriterConfig {
        heartbeat_period: Duration::ZERO,
        nack_response_delay: Duration::ZERO,
        ..WriterConfig::default()
    }
}

pub fn sync_flow() -> Arc<FlowController> {
    let config = FlowControllerConfig {
        name: "sync".into(),
        publish_mode: PublishMode::PureSync,
        ..FlowControllerConfig::default()
    };
    Arc::new(FlowController::new(config).expect("flow controller"))
}

pub fn build_writer(
    config: WriterConfig,
    transport: Arc<GatedTransport>,
    flow: Arc<FlowController>,
) -> ReliableWriter {
    ReliableWriter::builder(writer_guid())
        .config(config)
        .transport(transport)
        .flow_controller(flow)
        .build()
        .expect("writer")
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
