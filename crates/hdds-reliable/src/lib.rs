// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-reliable - Writer-side RTPS reliability engine
//!
//! The machinery by which a DDS writer guarantees that every sample it
//! publishes is eventually acknowledged by every matched reliable reader,
//! retransmitting on demand and pacing delivery through flow controllers.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          ReliableWriter                             |
//! |   write() / on_acknack() / on_nackfrag() / match_reader() / ...     |
//! |                                                                     |
//! |   +-------------+  +-------------+  +-------------+                 |
//! |   | ReaderProxy |  | ReaderProxy |  | ReaderProxy |  (one/reader)   |
//! |   |  records    |  |  records    |  |  records    |                 |
//! |   +-------------+  +-------------+  +-------------+                 |
//! |          |  UNSENT samples                ^  status on send         |
//! +----------|--------------------------------|-------------------------+
//!            v                                |
//! +---------------------------------------------------------------------+
//! |                          FlowController                             |
//! |   incoming (new | resend) --merge--> ready buckets --drain--> send   |
//! |   FIFO / round-robin / priority / priority+reservation, byte budget |
//! +---------------------------------------------------------------------+
//!            |
//!            v
//!        Transport::send(submessage, destinations)
//! ```
//!
//! ## Protocol Flow
//!
//! ```text
//! Writer                                    Reader
//!   |--- DATA (seq=1) ------------------------>|
//!   |--- DATA (seq=2) ----------X (lost)       |
//!   |--- DATA (seq=3) ------------------------>|
//!   |--- HEARTBEAT (first=1, last=3) --------->|
//!   |<-- ACKNACK (base=2, missing={2}) --------|
//!   |        (nack_response_delay)             |
//!   |--- DATA (seq=2) [retransmit] ----------->|
//!   |<-- ACKNACK (base=4, final) --------------|
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hdds_reliable::{
//!     AckNackMsg, ChangeKind, ChannelTransport, FlowController, FlowControllerConfig, Guid, ReaderQos,
//!     ReliableWriter, WriterConfig,
//! };
//!
//! # fn main() -> hdds_reliable::Result<()> {
//! let (transport, _rx) = ChannelTransport::bounded(1024);
//! let flow = Arc::new(FlowController::new(FlowControllerConfig::default())?);
//! let writer = ReliableWriter::builder(Guid::new([1; 12], [0, 0, 1, 0x02]))
//!     .config(WriterConfig::default())
//!     .transport(Arc::new(transport))
//!     .flow_controller(flow)
//!     .build()?;
//!
//! let reader = Guid::new([2; 12], [0, 0, 1, 0x07]);
//! writer.match_reader(reader, ReaderQos::reliable())?;
//! let seq = writer.write(ChangeKind::Alive, b"hello".to_vec())?;
//!
//! // ACKNACKs arrive from the network receive path
//! writer.on_acknack(&AckNackMsg::ack(reader, writer.guid(), seq + 1, 1));
//! writer.wait_for_acknowledgement(seq, Some(std::time::Duration::from_secs(1)))?;
//! # Ok(())
//! # }
//! ```

/// Static configuration objects (writer, flow controller, reader QoS).
pub mod config;
/// Error type and `Result` alias.
pub mod error;
/// Delivery scheduling (publish modes, scheduling disciplines, bandwidth limiting).
pub mod flow;
/// RTPS reliability submessages, sequence sets, metrics and the history collaborator.
pub mod reliability;
/// Transport capability consumed by the writer.
pub mod transport;
/// Core identifiers and the sample type.
pub mod types;
/// Stateful reliable writer and per-reader acknowledgement state.
pub mod writer;

pub use config::{
    DurabilityKind, FlowControllerConfig, HistoryKind, PublishMode, ReaderQos, ReliabilityKind,
    SchedulingDiscipline, WriterConfig,
};
pub use error::{Error, Result};
pub use flow::{
    ByteBudget, DeliveryResult, FlowController, FlowControllerClient, FlowControllerRegistry,
    FlowMetricsSnapshot, FlowWriterProperties,
};
pub use reliability::{
    AckNackMsg, DataFragMsg, DataMsg, FragmentNumberSet, GapMsg, HeartbeatMsg, HistoryCache,
    NackFragMsg, ReliableMetrics, ReliableMetricsSnapshot, RtpsRange, SequenceNumberSet,
    Submessage, WriterHistory,
};
pub use transport::{ChannelTransport, Outbound, Transport};
pub use types::{
    CacheChange, ChangeKind, EntityId, FragmentNumber, Guid, GuidPrefix, SampleId, SequenceNumber,
};
pub use writer::{
    ChangeForReader, ChangeForReaderStatus, ReaderProxy, ReaderSnapshot, ReliableWriter,
    ReliableWriterBuilder, RemovalPolicy, WriterListener,
};
