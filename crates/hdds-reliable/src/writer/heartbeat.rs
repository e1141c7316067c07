// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HEARTBEAT construction (writer-side).
//!
//! ```text
//! Writer                              Reader
//!   |--DATA(1..N) burst--------------->|  (some lost)
//!   |                                  |
//!   |--HEARTBEAT(first=1,last=N)------>|  (every heartbeat_period)
//!   |<--------------ACKNACK(missing)---|
//!   |--DATA retransmit---------------->|
//! ```

use crate::reliability::HeartbeatMsg;
use crate::types::{Guid, SequenceNumber};

/// Heartbeat transmitter state: the monotonic count.
#[derive(Debug)]
pub(crate) struct HeartbeatTx {
    count: u32,
}

impl HeartbeatTx {
    pub(crate) fn new() -> Self {
        Self { count: 1 }
    }

    /// Build a heartbeat announcing `[first_seq, last_seq]`.
    ///
    /// `reader_guid` is `Guid::unknown()` for a heartbeat addressed to every
    /// matched reader.
    pub(crate) fn build(
        &mut self,
        writer_guid: Guid,
        reader_guid: Guid,
        first_seq: SequenceNumber,
        last_seq: SequenceNumber,
        final_flag: bool,
    ) -> HeartbeatMsg {
        let hb = HeartbeatMsg {
            writer_guid,
            reader_guid,
            first_seq,
            last_seq,
            count: self.count,
            final_flag,
        };
        // Count 0 is never used on the wire
        self.count = self.count.wrapping_add(1).max(1);
        hb
    }

    /// Count the next heartbeat will carry.
    pub(crate) fn count(&self) -> u32 {
        self.count
    }
}

impl Default for HeartbeatTx {
    fn default() -> Self {
        Self::new()
    }
}
