// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer listener.
//!
//! Callbacks run on whichever thread triggered the event (application
//! writer, network receive thread, timer thread or flow controller worker),
//! always after the writer lock was released. They must be `Send + Sync` and
//! should not block.
//!
//! ```rust
//! use hdds_reliable::{SequenceNumber, WriterListener};
//!
//! struct AckLogger;
//!
//! impl WriterListener for AckLogger {
//!     fn on_acknowledged_by_all(&self, seq: SequenceNumber) {
//!         println!("sample {} acknowledged", seq);
//!     }
//! }
//! ```

use crate::config::ReaderQos;
use crate::types::{Guid, SequenceNumber};

/// Notifications emitted by a `ReliableWriter`. Every method defaults to a no-op.
pub trait WriterListener: Send + Sync {
    /// A reader was matched.
    fn on_reader_matched(&self, reader: Guid, qos: ReaderQos) {
        let _ = (reader, qos);
    }

    /// A reader was unmatched.
    fn on_reader_unmatched(&self, reader: Guid) {
        let _ = reader;
    }

    /// Every matched reliable reader acknowledged `seq`. Fired once per sample.
    fn on_acknowledged_by_all(&self, seq: SequenceNumber) {
        let _ = seq;
    }

    /// A sample left the history.
    ///
    /// `acknowledged` is false when the removal was forced (KEEP_LAST
    /// replacement or `RemovalPolicy::Force`) before every reader acknowledged it.
    fn on_sample_removed(&self, seq: SequenceNumber, acknowledged: bool) {
        let _ = (seq, acknowledged);
    }
}
