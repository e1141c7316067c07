// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer history collaborator.
//!
//! The reliable writer only needs ordered insert, lookup by sequence number,
//! the current `[lowest, highest]` range and removal. Eviction is always
//! driven by the writer so it can invalidate per-reader records before a
//! sample is released.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::HistoryKind;
use crate::error::{Error, Result};
use crate::types::{CacheChange, SequenceNumber};

/// Storage consumed by `ReliableWriter`.
pub trait WriterHistory: Send {
    /// Insert a change. Sequence numbers arrive strictly increasing.
    fn insert(&mut self, change: Arc<CacheChange>) -> Result<()>;

    /// Lookup by sequence number.
    fn get(&self, seq: SequenceNumber) -> Option<Arc<CacheChange>>;

    /// Remove and return a change.
    fn remove(&mut self, seq: SequenceNumber) -> Option<Arc<CacheChange>>;

    /// Lowest sequence number still stored.
    fn min_seq(&self) -> Option<SequenceNumber>;

    /// Highest sequence number still stored.
    fn max_seq(&self) -> Option<SequenceNumber>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples the history can hold before eviction (KEEP_LAST) or refusal (KEEP_ALL).
    fn capacity(&self) -> usize;

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    fn kind(&self) -> HistoryKind;

    /// Stored sequence numbers in increasing order.
    fn sequence_numbers(&self) -> Vec<SequenceNumber>;
}

/// Default in-memory history: an ordered ring of shared changes.
#[derive(Debug)]
pub struct HistoryCache {
    ring: VecDeque<Arc<CacheChange>>,
    capacity: usize,
    kind: HistoryKind,
    quota_bytes: usize,
}

impl HistoryCache {
    /// Create a history of `kind` holding at most `capacity` samples.
    pub fn new(kind: HistoryKind, capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            kind,
            quota_bytes: 0,
        }
    }

    /// Total payload bytes currently stored.
    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    fn position(&self, seq: SequenceNumber) -> Option<usize> {
        self.ring
            .binary_search_by_key(&seq, |c| c.sequence_number)
            .ok()
    }
}

impl WriterHistory for HistoryCache {
    fn insert(&mut self, change: Arc<CacheChange>) -> Result<()> {
        if let Some(last) = self.ring.back() {
            if change.sequence_number <= last.sequence_number {
                return Err(Error::OutOfOrderSequence {
                    last: last.sequence_number,
                    got: change.sequence_number,
                });
            }
        }
        if self.ring.len() >= self.capacity {
            return Err(Error::ResourceLimitExceeded(format!(
                "history full ({} samples)",
                self.capacity
            )));
        }
        self.quota_bytes += change.size();
        self.ring.push_back(change);
        Ok(())
    }

    fn get(&self, seq: SequenceNumber) -> Option<Arc<CacheChange>> {
        self.position(seq).map(|idx| Arc::clone(&self.ring[idx]))
    }

    fn remove(&mut self, seq: SequenceNumber) -> Option<Arc<CacheChange>> {
        let change = self.ring.remove(self.position(seq)?)?;
        self.quota_bytes = self.quota_bytes.saturating_sub(change.size());
        Some(change)
    }

    fn min_seq(&self) -> Option<SequenceNumber> {
        self.ring.front().map(|c| c.sequence_number)
    }

    fn max_seq(&self) -> Option<SequenceNumber> {
        self.ring.back().map(|c| c.sequence_number)
    }

    fn len(&self) -> usize {
        self.ring.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn kind(&self) -> HistoryKind {
        self.kind
    }

    fn sequence_numbers(&self) -> Vec<SequenceNumber> {
        self.ring.iter().map(|c| c.sequence_number).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, Guid};

    fn change(seq: SequenceNumber) -> Arc<CacheChange> {
        Arc::new(CacheChange::new(
            Guid::unknown(),
            seq,
            ChangeKind::Alive,
            vec![0u8; 8],
        ))
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut cache = HistoryCache::new(HistoryKind::KeepLast(4), 4);
        for seq in 1..=3 {
            cache.insert(change(seq)).expect("insert");
        }
        assert_eq!(cache.min_seq(), Some(1));
        assert_eq!(cache.max_seq(), Some(3));
        assert_eq!(cache.quota_bytes(), 24);

        assert!(cache.remove(2).is_some());
        assert!(cache.get(2).is_none());
        assert_eq!(cache.get(3).map(|c| c.sequence_number), Some(3));
        assert_eq!(cache.sequence_numbers(), vec![1, 3]);
    }

    #[test]
    fn test_rejects_out_of_order_and_full() {
        let mut cache = HistoryCache::new(HistoryKind::KeepAll, 2);
        cache.insert(change(5)).expect("insert");
        assert!(matches!(
            cache.insert(change(5)),
            Err(Error::OutOfOrderSequence { last: 5, got: 5 })
        ));
        cache.insert(change(6)).expect("insert");
        assert!(cache.is_full());
        assert!(matches!(
            cache.insert(change(7)),
            Err(Error::ResourceLimitExceeded(_))
        ));
    }
}
