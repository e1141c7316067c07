// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer-side reliability metrics
//!
//! Tracks the traffic a reliable writer produces and the control messages it
//! consumes.
//!
//! # Thread Safety
//!
//! All methods use atomic operations (Relaxed ordering) for lock-free updates.

use std::sync::atomic::{AtomicU64, Ordering};

/// Reliable writer metrics collector
#[derive(Debug, Default)]
pub struct ReliableMetrics {
    /// DATA submessages sent (first transmissions and resends)
    data_sent: AtomicU64,
    /// DATA_FRAG submessages sent
    data_frags_sent: AtomicU64,
    /// Samples (or fragments) sent again after a NACK
    retransmit_sent: AtomicU64,
    /// GAP submessages sent
    gaps_sent: AtomicU64,
    heartbeats_sent: AtomicU64,
    acknacks_received: AtomicU64,
    /// ACKNACK/NACKFRAG dropped because their count was stale
    acknacks_ignored: AtomicU64,
    nackfrags_received: AtomicU64,
    /// Sequence numbers named in NACK bitmaps
    nacked_sequences: AtomicU64,
    /// Samples acknowledged by every matched reliable reader
    acked_by_all: AtomicU64,
    /// Transport sends that failed (back-pressure or I/O error)
    send_failures: AtomicU64,
    /// Payload bytes handed to the transport
    bytes_sent: AtomicU64,
    /// High-water mark of records held by a single reader proxy
    max_pending_records: AtomicU64,
}

/// Point-in-time copy of [`ReliableMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReliableMetricsSnapshot {
    pub data_sent: u64,
    pub data_frags_sent: u64,
    pub retransmit_sent: u64,
    pub gaps_sent: u64,
    pub heartbeats_sent: u64,
    pub acknacks_received: u64,
    pub acknacks_ignored: u64,
    pub nackfrags_received: u64,
    pub nacked_sequences: u64,
    pub acked_by_all: u64,
    pub send_failures: u64,
    pub bytes_sent: u64,
    pub max_pending_records: u64,
}

impl ReliableMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_data_sent(&self, retransmit: bool) {
        self.data_sent.fetch_add(1, Ordering::Relaxed);
        if retransmit {
            self.retransmit_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_data_frags_sent(&self, retransmit: bool) {
        self.data_frags_sent.fetch_add(1, Ordering::Relaxed);
        if retransmit {
            self.retransmit_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_gaps_sent(&self, count: u64) {
        self.gaps_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_heartbeats_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_acknacks_received(&self) {
        self.acknacks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_acknacks_ignored(&self) {
        self.acknacks_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_nackfrags_received(&self) {
        self.nackfrags_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_nacked_sequences(&self, count: u64) {
        self.nacked_sequences.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_acked_by_all(&self, count: u64) {
        self.acked_by_all.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_send_failures(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Update the pending-records high-water mark.
    pub fn observe_pending_records(&self, count: usize) {
        self.max_pending_records
            .fetch_max(count as u64, Ordering::Relaxed);
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    pub fn retransmit_sent(&self) -> u64 {
        self.retransmit_sent.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    pub fn snapshot(&self) -> ReliableMetricsSnapshot {
        ReliableMetricsSnapshot {
            data_sent: self.data_sent.load(Ordering::Relaxed),
            data_frags_sent: self.data_frags_sent.load(Ordering::Relaxed),
            retransmit_sent: self.retransmit_sent.load(Ordering::Relaxed),
            gaps_sent: self.gaps_sent.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            acknacks_received: self.acknacks_received.load(Ordering::Relaxed),
            acknacks_ignored: self.acknacks_ignored.load(Ordering::Relaxed),
            nackfrags_received: self.nackfrags_received.load(Ordering::Relaxed),
            nacked_sequences: self.nacked_sequences.load(Ordering::Relaxed),
            acked_by_all: self.acked_by_all.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            max_pending_records: self.max_pending_records.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retransmit_counts_as_data() {
        let metrics = ReliableMetrics::new();
        metrics.increment_data_sent(false);
        metrics.increment_data_sent(true);
        metrics.increment_data_frags_sent(true);
        let snap = metrics.snapshot();
        assert_eq!(snap.data_sent, 2);
        assert_eq!(snap.data_frags_sent, 1);
        assert_eq!(snap.retransmit_sent, 2);
    }

    #[test]
    fn test_pending_high_water_mark() {
        let metrics = ReliableMetrics::new();
        metrics.observe_pending_records(5);
        metrics.observe_pending_records(3);
        assert_eq!(metrics.snapshot().max_pending_records, 5);
    }
}
