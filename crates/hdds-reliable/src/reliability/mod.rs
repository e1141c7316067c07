// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RTPS Reliability Protocol Building Blocks
//!
//! Submessage values, sequence/fragment number sets, the writer history
//! collaborator and observability counters shared by the writer and the
//! flow controllers.
//!
//! | Component | Role |
//! |-----------|------|
//! | `HeartbeatMsg` | Writer announces its available sequence range |
//! | `AckNackMsg` / `NackFragMsg` | Reader acknowledges or requests resends |
//! | `DataMsg` / `DataFragMsg` | Sample payload, whole or fragmented |
//! | `GapMsg` | Writer declares sequences irrelevant |
//! | `WriterHistory` / `HistoryCache` | Writer stores samples for retransmission |
//! | `ReliableMetrics` | Observability counters |

mod history;
mod messages;
mod metrics;
mod rtps_range;

pub use history::{HistoryCache, WriterHistory};
pub use messages::{
    AckNackMsg, DataFragMsg, DataMsg, FragmentNumberSet, GapMsg, HeartbeatMsg, NackFragMsg,
    SequenceNumberSet, Submessage, MAX_BITMAP_BITS,
};
pub use metrics::{ReliableMetrics, ReliableMetricsSnapshot};
pub use rtps_range::{coalesce, RtpsRange};
