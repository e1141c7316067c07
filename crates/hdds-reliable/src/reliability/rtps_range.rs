// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS sequence number range abstraction
//!
//! Semantic constructors over `Range<u64>` so callers never hand-write the
//! `+1` boundary shifts of RTPS ranges.

use std::ops::Range;

use crate::types::SequenceNumber;

/// RTPS sequence number range (exclusive boundaries `[start, end)`)
///
/// Two ranges `A` and `B` are contiguous if `A.end == B.start`. Empty ranges
/// cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RtpsRange {
    inner: Range<SequenceNumber>,
}

impl RtpsRange {
    /// Create range from exclusive boundaries `[start, end)`, `None` if empty.
    pub fn new(start: SequenceNumber, end: SequenceNumber) -> Option<Self> {
        (start < end).then_some(Self { inner: start..end })
    }

    /// Create range from inclusive boundaries `[start, end_inclusive]`.
    #[allow(clippy::range_plus_one)]
    pub fn from_inclusive(start: SequenceNumber, end_inclusive: SequenceNumber) -> Option<Self> {
        if start > end_inclusive {
            return None;
        }
        Some(Self {
            inner: start..end_inclusive.saturating_add(1),
        })
    }

    /// Create single-element range `[seq, seq+1)`
    #[allow(clippy::range_plus_one)]
    pub fn from_sequence(seq: SequenceNumber) -> Self {
        Self {
            inner: seq..seq.saturating_add(1),
        }
    }

    /// Start of range (inclusive)
    pub fn start(&self) -> SequenceNumber {
        self.inner.start
    }

    /// End of range (exclusive)
    pub fn end(&self) -> SequenceNumber {
        self.inner.end
    }

    /// Last sequence number contained in the range.
    pub fn last(&self) -> SequenceNumber {
        self.inner.end - 1
    }

    pub fn len(&self) -> u64 {
        self.inner.end - self.inner.start
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        self.inner.contains(&seq)
    }

    /// Extend the range by one if `seq` directly follows it.
    pub fn try_extend(&mut self, seq: SequenceNumber) -> bool {
        if seq == self.inner.end {
            self.inner.end += 1;
            true
        } else {
            false
        }
    }

    pub fn as_range(&self) -> &Range<SequenceNumber> {
        &self.inner
    }

    pub fn into_range(self) -> Range<SequenceNumber> {
        self.inner
    }

    pub fn iter(&self) -> Range<SequenceNumber> {
        self.inner.clone()
    }
}

/// Coalesce sorted, deduplicated sequence numbers into contiguous ranges.
pub fn coalesce(sequences: &[SequenceNumber]) -> Vec<RtpsRange> {
    let mut ranges: Vec<RtpsRange> = Vec::new();
    for &seq in sequences {
        let extended = ranges.last_mut().is_some_and(|last| last.try_extend(seq));
        if !extended {
            ranges.push(RtpsRange::from_sequence(seq));
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert!(RtpsRange::new(5, 5).is_none());
        let r = RtpsRange::from_inclusive(10, 15).expect("valid");
        assert_eq!(r.as_range(), &(10..16));
        assert_eq!(r.last(), 15);
        assert_eq!(r.len(), 6);
        assert!(RtpsRange::from_sequence(42).contains(42));
        assert!(!RtpsRange::from_sequence(42).contains(43));
    }

    #[test]
    fn test_coalesce_runs() {
        let ranges = coalesce(&[1, 2, 3, 7, 9, 10]);
        let ranges: Vec<_> = ranges.into_iter().map(RtpsRange::into_range).collect();
        assert_eq!(ranges, vec![1..4, 7..8, 9..11]);
        assert!(coalesce(&[]).is_empty());
    }
}
