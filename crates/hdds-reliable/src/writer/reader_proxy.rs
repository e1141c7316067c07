// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-reader acknowledgement state (RTPS ReaderProxy, DDS-RTPS v2.5 Sec.8.4.7.4).
//!
//! One `ReaderProxy` per matched reader tracks the delivery/ack status of
//! every outstanding sample for that reader.
//!
//! ```text
//!            new sample (push)           send ok (reliable)
//!   (none) ------------------> UNSENT ---------------------> UNDERWAY
//!      |  new sample (pull)      ^  ^                           |
//!      +---------------------+   |  | nack-response             | nack-suppression
//!                            v   |  | timer                     v
//!                     UNACKNOWLEDGED <-------------------- UNACKNOWLEDGED
//!                            |      \                          |
//!                            |  NACK \--> REQUESTED <----------+ NACK
//!                            |
//!                            +-- ACKNACK base > seq --> ACKNOWLEDGED (erased)
//! ```
//!
//! Records are kept in increasing sequence order. Everything at or below the
//! low-water-mark is acknowledged and never stored again.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::ReaderQos;
use crate::error::{Error, Result};
use crate::reliability::{FragmentNumberSet, SequenceNumberSet, WriterHistory};
use crate::types::{FragmentNumber, Guid, SequenceNumber};

/// Status of one sample for one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeForReaderStatus {
    /// Waiting for the flow controller.
    Unsent,
    /// Sent (or announced), no acknowledgement yet.
    Unacknowledged,
    /// Reader asked for a resend; waiting for the nack-response delay.
    Requested,
    /// Just sent; renewed NACKs are assumed to be already in flight.
    Underway,
    /// Terminal.
    Acknowledged,
}

/// Unsent-fragment bitmap of a fragmented sample (fragments are 1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
struct FragmentBits {
    words: Vec<u64>,
    count: FragmentNumber,
    unsent: FragmentNumber,
}

impl FragmentBits {
    fn all_unsent(count: FragmentNumber) -> Self {
        let mut bits = Self {
            words: vec![0; (count as usize).div_ceil(64)],
            count,
            unsent: 0,
        };
        bits.reset();
        bits
    }

    fn position(&self, frag: FragmentNumber) -> Option<(usize, u64)> {
        if frag == 0 || frag > self.count {
            return None;
        }
        let offset = (frag - 1) as usize;
        Some((offset / 64, 1u64 << (offset % 64)))
    }

    fn reset(&mut self) {
        for word in &mut self.words {
            *word = u64::MAX;
        }
        let tail = (self.count % 64) as u32;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        self.unsent = self.count;
    }

    fn is_unsent(&self, frag: FragmentNumber) -> bool {
        self.position(frag)
            .map(|(word, mask)| self.words[word] & mask != 0)
            .unwrap_or(false)
    }

    /// Returns `true` once no fragment is left unsent.
    fn mark_sent(&mut self, frag: FragmentNumber) -> bool {
        if let Some((word, mask)) = self.position(frag) {
            if self.words[word] & mask != 0 {
                self.words[word] &= !mask;
                self.unsent -= 1;
            }
        }
        self.unsent == 0
    }

    fn mark_unsent(&mut self, frag: FragmentNumber) -> bool {
        match self.position(frag) {
            Some((word, mask)) => {
                if self.words[word] & mask == 0 {
                    self.words[word] |= mask;
                    self.unsent += 1;
                }
                true
            }
            None => false,
        }
    }

    fn unsent(&self) -> impl Iterator<Item = FragmentNumber> + '_ {
        (1..=self.count).filter(move |f| self.is_unsent(*f))
    }
}

/// Association between one sample and one reader (RTPS ChangeForReader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeForReader {
    seq: SequenceNumber,
    status: ChangeForReaderStatus,
    relevant: bool,
    fragments: Option<FragmentBits>,
    sent_at: Option<Instant>,
    sent_once: bool,
}

impl ChangeForReader {
    fn new(
        seq: SequenceNumber,
        status: ChangeForReaderStatus,
        relevant: bool,
        fragment_count: FragmentNumber,
    ) -> Self {
        let fragments = (relevant && fragment_count > 1).then(|| FragmentBits::all_unsent(fragment_count));
        Self {
            seq,
            status,
            relevant,
            fragments,
            sent_at: None,
            sent_once: false,
        }
    }

    /// Sequence number of the sample.
    pub fn sequence_number(&self) -> SequenceNumber {
        self.seq
    }

    /// Current delivery status for this reader.
    pub fn status(&self) -> ChangeForReaderStatus {
        self.status
    }

    /// False once the sample is irrelevant to the reader (filtered, evicted,
    /// or historical for a volatile reader): a GAP is sent instead of DATA.
    pub fn is_relevant(&self) -> bool {
        self.relevant
    }

    /// True if the sample is delivered as DATA_FRAG.
    pub fn is_fragmented(&self) -> bool {
        self.fragments.is_some()
    }

    /// Fragments still to be sent, ascending.
    pub fn unsent_fragments(&self) -> Vec<FragmentNumber> {
        self.fragments
            .as_ref()
            .map(|bits| bits.unsent().collect())
            .unwrap_or_default()
    }

    /// True if fragment `frag` still has to be sent.
    pub fn is_fragment_unsent(&self, frag: FragmentNumber) -> bool {
        self.fragments
            .as_ref()
            .map(|bits| bits.is_unsent(frag))
            .unwrap_or(false)
    }

    /// True if DATA/GAP for this sample already left once.
    pub fn was_sent(&self) -> bool {
        self.sent_once
    }

    fn is_acknowledged(&self) -> bool {
        self.status == ChangeForReaderStatus::Acknowledged || !self.relevant
    }

    fn reset_fragments(&mut self) {
        if let Some(bits) = self.fragments.as_mut() {
            bits.reset();
        }
    }
}

/// Copy of a reader proxy for introspection.
#[derive(Debug, Clone)]
pub struct ReaderSnapshot {
    pub guid: Guid,
    pub qos: ReaderQos,
    pub reliable: bool,
    pub push_mode: bool,
    pub low_water_mark: SequenceNumber,
    pub highest_added: SequenceNumber,
    pub acked_through: SequenceNumber,
    pub records: Vec<ChangeForReader>,
}

impl ReaderSnapshot {
    /// Status of `seq`, `None` if no record is kept for it.
    pub fn status_of(&self, seq: SequenceNumber) -> Option<ChangeForReaderStatus> {
        self.records
            .iter()
            .find(|r| r.seq == seq)
            .map(|r| r.status)
    }
}

/// Writer-side state of one matched reader.
#[derive(Debug)]
pub struct ReaderProxy {
    guid: Guid,
    qos: ReaderQos,
    reliable: bool,
    push_mode: bool,
    low_water_mark: SequenceNumber,
    highest_added: SequenceNumber,
    records: VecDeque<ChangeForReader>,
    last_acknack_count: Option<u32>,
    last_nackfrag_count: Option<u32>,
    pub(crate) nack_response_armed: bool,
    pub(crate) nack_suppression_armed: bool,
}

impl ReaderProxy {
    /// Create a proxy; `reliable` is the effective reliability of the match.
    pub fn new(guid: Guid, qos: ReaderQos, reliable: bool, push_mode: bool) -> Self {
        Self {
            guid,
            qos,
            reliable,
            push_mode,
            low_water_mark: 0,
            highest_added: 0,
            records: VecDeque::new(),
            last_acknack_count: None,
            last_nackfrag_count: None,
            nack_response_armed: false,
            nack_suppression_armed: false,
        }
    }

    /// Start tracking after `seq`: everything up to it counts as acknowledged.
    pub fn with_low_water_mark(mut self, seq: SequenceNumber) -> Self {
        self.low_water_mark = seq;
        self.highest_added = seq;
        self
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn qos(&self) -> ReaderQos {
        self.qos
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn push_mode(&self) -> bool {
        self.push_mode
    }

    pub fn low_water_mark(&self) -> SequenceNumber {
        self.low_water_mark
    }

    pub fn highest_added(&self) -> SequenceNumber {
        self.highest_added
    }

    /// Records currently retained.
    pub fn pending_records(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, seq: SequenceNumber) -> Option<&ChangeForReader> {
        self.index_of(seq).map(|idx| &self.records[idx])
    }

    fn index_of(&self, seq: SequenceNumber) -> Option<usize> {
        self.records.binary_search_by_key(&seq, |r| r.seq).ok()
    }

    fn record_mut(&mut self, seq: SequenceNumber) -> Option<&mut ChangeForReader> {
        let idx = self.index_of(seq)?;
        self.records.get_mut(idx)
    }

    /// Track a new sample for this reader.
    ///
    /// `seq` must be strictly greater than every sequence added before; a
    /// violation is reported as `OutOfOrderSequence` and nothing is stored.
    pub fn add_record(
        &mut self,
        seq: SequenceNumber,
        status: ChangeForReaderStatus,
        relevant: bool,
        fragment_count: FragmentNumber,
    ) -> Result<()> {
        if seq <= self.highest_added {
            return Err(Error::OutOfOrderSequence {
                last: self.highest_added,
                got: seq,
            });
        }
        self.highest_added = seq;

        // Nothing outstanding and nothing to do: only move the watermark
        if self.records.is_empty() && status == ChangeForReaderStatus::Acknowledged {
            self.low_water_mark = seq;
            return Ok(());
        }

        self.records
            .push_back(ChangeForReader::new(seq, status, relevant, fragment_count));
        Ok(())
    }

    /// True if `seq` no longer needs anything from this reader.
    pub fn is_acknowledged(&self, seq: SequenceNumber) -> bool {
        if seq <= self.low_water_mark {
            return true;
        }
        self.record(seq)
            .map(ChangeForReader::is_acknowledged)
            .unwrap_or(false)
    }

    /// Highest sequence such that everything up to it is acknowledged (or
    /// irrelevant) for this reader.
    pub fn acked_through(&self) -> SequenceNumber {
        let mut through = self.low_water_mark;
        for record in &self.records {
            if !record.is_acknowledged() {
                return through;
            }
            through = record.seq;
        }
        through.max(self.highest_added)
    }

    /// Acknowledge everything below `seq`.
    ///
    /// If `seq` does not advance the low-water-mark the reader has lost state
    /// (e.g. it was reset out of band): records for `[seq, low_water_mark]` are
    /// rebuilt from `history`, marked irrelevant where the sample is gone, and
    /// the low-water-mark moves back to `seq - 1`.
    pub fn acknowledge_before(
        &mut self,
        seq: SequenceNumber,
        history: &dyn WriterHistory,
        fragment_size: usize,
    ) {
        if seq == 0 || seq == self.low_water_mark + 1 {
            return;
        }
        let target = seq - 1;

        if target < self.low_water_mark {
            for restored in (seq..=self.low_water_mark).rev() {
                let (relevant, frags) = match history.get(restored) {
                    Some(change) => (true, change.fragment_count(fragment_size)),
                    None => (false, 0),
                };
                self.records.push_front(ChangeForReader::new(
                    restored,
                    ChangeForReaderStatus::Unacknowledged,
                    relevant,
                    frags,
                ));
            }
            log::debug!(
                "[writer] reader {} went back from {} to {}, {} records restored",
                self.guid,
                self.low_water_mark,
                target,
                self.low_water_mark - target
            );
            self.low_water_mark = target;
            return;
        }

        let target = target.min(self.highest_added);
        while self.records.front().is_some_and(|r| r.seq <= target) {
            self.records.pop_front();
        }
        self.low_water_mark = self.low_water_mark.max(target);
        self.trim_head();
    }

    /// Acknowledge the sequences the bitmap of `set` leaves unset below its
    /// highest requested sequence: the reader reports those as received.
    pub fn acknowledge_unset(&mut self, set: &SequenceNumberSet) -> usize {
        let Some(last) = set.last() else {
            return 0;
        };
        let base = set.base();
        let mut count = 0;
        for record in self.records.iter_mut() {
            if record.seq >= last {
                break;
            }
            if record.seq >= base
                && !set.contains(record.seq)
                && record.status != ChangeForReaderStatus::Acknowledged
            {
                record.status = ChangeForReaderStatus::Acknowledged;
                record.fragments = None;
                count += 1;
            }
        }
        self.trim_head();
        count
    }

    /// Mark the UNACKNOWLEDGED sequences of `seqs` as requested.
    ///
    /// UNSENT records are already on their way to the scheduler and UNDERWAY
    /// records are inside their nack-suppression window; both keep their
    /// status. Returns `true` if at least one tracked, non-acknowledged
    /// record matched.
    pub fn mark_requested<I>(&mut self, seqs: I) -> bool
    where
        I: IntoIterator<Item = SequenceNumber>,
    {
        let mut found = false;
        for seq in seqs {
            let Some(record) = self.record_mut(seq) else {
                continue;
            };
            match record.status {
                ChangeForReaderStatus::Acknowledged => continue,
                ChangeForReaderStatus::Unacknowledged => {
                    record.status = ChangeForReaderStatus::Requested;
                    record.reset_fragments();
                }
                ChangeForReaderStatus::Unsent
                | ChangeForReaderStatus::Requested
                | ChangeForReaderStatus::Underway => {}
            }
            found = true;
        }
        found
    }

    /// Fragment-level request: only the named fragments become unsent.
    ///
    /// A record still UNSENT keeps its status; an UNDERWAY record ignores the
    /// request until its nack-suppression window closes.
    pub fn mark_fragment_requested(
        &mut self,
        seq: SequenceNumber,
        fragments: &FragmentNumberSet,
    ) -> bool {
        let Some(record) = self.record_mut(seq) else {
            return false;
        };
        if matches!(
            record.status,
            ChangeForReaderStatus::Acknowledged | ChangeForReaderStatus::Underway
        ) {
            return false;
        }
        let Some(bits) = record.fragments.as_mut() else {
            // Not fragmented: fall back to a full resend
            if record.status != ChangeForReaderStatus::Unsent {
                record.status = ChangeForReaderStatus::Requested;
            }
            return true;
        };
        let mut any = false;
        for frag in fragments.iter() {
            any |= bits.mark_unsent(frag);
        }
        if any && record.status != ChangeForReaderStatus::Unsent {
            record.status = ChangeForReaderStatus::Requested;
        }
        any
    }

    /// General transition of one record.
    ///
    /// Acknowledging the head record erases it and advances the
    /// low-water-mark. Returns `false` if no record exists for `seq`.
    pub fn set_status(&mut self, seq: SequenceNumber, status: ChangeForReaderStatus) -> bool {
        let Some(record) = self.record_mut(seq) else {
            return false;
        };
        record.status = status;
        match status {
            ChangeForReaderStatus::Acknowledged => {
                record.fragments = None;
                self.trim_head();
            }
            ChangeForReaderStatus::Underway => {
                record.sent_at = Some(Instant::now());
                record.sent_once = true;
            }
            ChangeForReaderStatus::Unacknowledged => {
                record.sent_once = true;
            }
            _ => {}
        }
        true
    }

    /// Clear one fragment's unsent bit; returns `true` once all are sent.
    pub fn mark_fragment_sent(&mut self, seq: SequenceNumber, frag: FragmentNumber) -> bool {
        match self.record_mut(seq).and_then(|r| r.fragments.as_mut()) {
            Some(bits) => bits.mark_sent(frag),
            None => true,
        }
    }

    /// Move every record in state `from` to `to`; returns the moved sequences.
    pub fn bulk_transition(
        &mut self,
        from: ChangeForReaderStatus,
        to: ChangeForReaderStatus,
    ) -> Vec<SequenceNumber> {
        let moved: Vec<SequenceNumber> = self
            .records
            .iter()
            .filter(|r| r.status == from)
            .map(|r| r.seq)
            .collect();
        for seq in &moved {
            self.set_status(*seq, to);
        }
        moved
    }

    /// UNDERWAY records sent at least `suppression` ago become UNACKNOWLEDGED.
    ///
    /// Returns the number of expired records and the deadline of the next one.
    pub fn expire_underway(
        &mut self,
        now: Instant,
        suppression: Duration,
    ) -> (usize, Option<Instant>) {
        let mut expired = 0;
        let mut next: Option<Instant> = None;
        for record in self.records.iter_mut() {
            if record.status != ChangeForReaderStatus::Underway {
                continue;
            }
            let deadline = record.sent_at.map(|t| t + suppression).unwrap_or(now);
            if deadline <= now {
                record.status = ChangeForReaderStatus::Unacknowledged;
                expired += 1;
            } else {
                next = Some(next.map_or(deadline, |n| n.min(deadline)));
            }
        }
        (expired, next)
    }

    /// Sample left the history: the record must never reach the wire as DATA.
    pub fn invalidate(&mut self, seq: SequenceNumber) {
        let reliable = self.reliable;
        let Some(record) = self.record_mut(seq) else {
            return;
        };
        if !reliable {
            self.set_status(seq, ChangeForReaderStatus::Acknowledged);
            return;
        }
        record.relevant = false;
        record.fragments = None;
        if record.status == ChangeForReaderStatus::Unsent {
            record.status = ChangeForReaderStatus::Unacknowledged;
        }
    }

    /// Accept an ACKNACK counter only if it is newer than the last one.
    pub fn check_acknack_count(&mut self, count: u32) -> bool {
        accept_count(&mut self.last_acknack_count, count)
    }

    /// Accept a NACKFRAG counter only if it is newer than the last one.
    pub fn check_nackfrag_count(&mut self, count: u32) -> bool {
        accept_count(&mut self.last_nackfrag_count, count)
    }

    /// Sequences currently UNSENT, ascending.
    pub fn unsent_sequences(&self) -> Vec<SequenceNumber> {
        self.records
            .iter()
            .filter(|r| r.status == ChangeForReaderStatus::Unsent)
            .map(|r| r.seq)
            .collect()
    }

    /// Irrelevant UNSENT sequences, ascending (announced with one GAP).
    pub(crate) fn unsent_irrelevant(&self) -> Vec<SequenceNumber> {
        self.records
            .iter()
            .filter(|r| r.status == ChangeForReaderStatus::Unsent && !r.relevant)
            .map(|r| r.seq)
            .collect()
    }

    /// True if a record still waits for the reader.
    pub fn has_unacknowledged(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.status != ChangeForReaderStatus::Acknowledged)
    }

    pub fn snapshot(&self) -> ReaderSnapshot {
        ReaderSnapshot {
            guid: self.guid,
            qos: self.qos,
            reliable: self.reliable,
            push_mode: self.push_mode,
            low_water_mark: self.low_water_mark,
            highest_added: self.highest_added,
            acked_through: self.acked_through(),
            records: self.records.iter().cloned().collect(),
        }
    }

    fn trim_head(&mut self) {
        while let Some(front) = self.records.front() {
            if front.status != ChangeForReaderStatus::Acknowledged {
                break;
            }
            self.low_water_mark = front.seq;
            self.records.pop_front();
        }
        if self.records.is_empty() {
            self.low_water_mark = self.highest_added.max(self.low_water_mark);
        }
    }
}

fn accept_count(last: &mut Option<u32>, count: u32) -> bool {
    match *last {
        Some(prev) if count <= prev => false,
        _ => {
            *last = Some(count);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistoryKind, ReaderQos};
    use crate::reliability::HistoryCache;
    use crate::types::{CacheChange, ChangeKind};
    use std::sync::Arc;

    use ChangeForReaderStatus::*;

    fn reader() -> Guid {
        Guid::new([2; 12], [0, 0, 1, 0x07])
    }

    fn proxy() -> ReaderProxy {
        ReaderProxy::new(reader(), ReaderQos::reliable(), true, true)
    }

    fn history_with(seqs: &[u64]) -> HistoryCache {
        let writer = Guid::new([1; 12], [0, 0, 1, 0x02]);
        let mut history = HistoryCache::new(HistoryKind::KeepAll, 64);
        for &seq in seqs {
            history
                .insert(Arc::new(CacheChange::new(writer, seq, ChangeKind::Alive, vec![0u8; 8])))
                .expect("insert");
        }
        history
    }

    #[test]
    fn test_out_of_order_add_rejected() {
        let mut p = proxy();
        p.add_record(1, Unsent, true, 0).expect("seq 1");
        p.add_record(3, Unsent, true, 0).expect("seq 3");
        assert!(matches!(
            p.add_record(2, Unsent, true, 0),
            Err(Error::OutOfOrderSequence { last: 3, got: 2 })
        ));
        assert_eq!(p.pending_records(), 2);
    }

    #[test]
    fn test_fast_path_keeps_no_records() {
        let mut p = ReaderProxy::new(reader(), ReaderQos::best_effort(), false, true);
        for seq in 1..=100 {
            p.add_record(seq, Acknowledged, false, 0).expect("add");
        }
        assert_eq!(p.pending_records(), 0);
        assert_eq!(p.low_water_mark(), 100);
        assert!(p.is_acknowledged(100));
        assert!(!p.is_acknowledged(101));
    }

    #[test]
    fn test_acknowledge_before_trims_and_advances() {
        let history = history_with(&[1, 2, 3, 4, 5]);
        let mut p = proxy();
        for seq in 1..=5 {
            p.add_record(seq, Underway, true, 0).expect("add");
        }
        p.acknowledge_before(4, &history, 1024);
        assert_eq!(p.low_water_mark(), 3);
        assert_eq!(p.pending_records(), 2);
        assert!(p.is_acknowledged(3));
        assert!(!p.is_acknowledged(4));

        // Acknowledging past the highest added sequence clamps
        p.acknowledge_before(100, &history, 1024);
        assert_eq!(p.low_water_mark(), 5);
        assert_eq!(p.pending_records(), 0);
    }

    #[test]
    fn test_acknowledge_before_recovery_restores_records() {
        let history = history_with(&[3, 4, 5]);
        let mut p = proxy();
        for seq in 1..=5 {
            p.add_record(seq, Underway, true, 0).expect("add");
        }
        p.acknowledge_before(6, &history, 1024);
        assert_eq!(p.pending_records(), 0);

        // Reader starts over from 2: sample 2 is gone, 3..5 still stored
        p.acknowledge_before(2, &history, 1024);
        assert_eq!(p.low_water_mark(), 1);
        let seqs: Vec<_> = p.snapshot().records.iter().map(|r| r.sequence_number()).collect();
        assert_eq!(seqs, vec![2, 3, 4, 5]);
        assert!(!p.record(2).expect("restored").is_relevant());
        assert!(p.record(3).expect("restored").is_relevant());
        assert_eq!(p.record(4).map(|r| r.status()), Some(Unacknowledged));
        assert!(p.is_acknowledged(2), "irrelevant counts as acknowledged");
        assert!(!p.is_acknowledged(3));
    }

    #[test]
    fn test_mark_requested_and_unset_bits() {
        let mut p = proxy();
        for seq in 1..=4 {
            p.add_record(seq, Unacknowledged, true, 0).expect("add");
        }
        p.add_record(5, Underway, true, 0).expect("add");
        let history = history_with(&[1, 2, 3, 4, 5]);
        let set = SequenceNumberSet::from_sequences(3, &[4, 5]).expect("set");
        p.acknowledge_before(set.base(), &history, 1024);
        p.acknowledge_unset(&set);
        assert!(p.mark_requested(set.iter()));

        assert_eq!(p.low_water_mark(), 3, "unset bit 3 counts as received");
        assert_eq!(p.record(4).map(|r| r.status()), Some(Requested));
        assert_eq!(p.record(5).map(|r| r.status()), Some(Underway), "still suppressed");
        assert!(!p.mark_requested([42]));
    }

    #[test]
    fn test_underway_and_unsent_ignore_requests() {
        let mut p = proxy();
        p.add_record(1, Underway, true, 0).expect("add");
        p.add_record(2, Unsent, true, 0).expect("add");
        assert!(p.mark_requested([1, 2]), "tracked records still match");
        assert_eq!(p.record(1).map(|r| r.status()), Some(Underway));
        assert_eq!(p.record(2).map(|r| r.status()), Some(Unsent));

        // Suppression over: the next request is honoured
        let (expired, _) = p.expire_underway(Instant::now() + Duration::from_secs(1), Duration::ZERO);
        assert_eq!(expired, 1);
        assert!(p.mark_requested([1]));
        assert_eq!(p.record(1).map(|r| r.status()), Some(Requested));
    }

    #[test]
    fn test_set_status_acknowledged_cascade() {
        let mut p = proxy();
        for seq in 1..=3 {
            p.add_record(seq, Unacknowledged, true, 0).expect("add");
        }
        // Middle record acknowledged: kept until the head goes
        assert!(p.set_status(2, Acknowledged));
        assert_eq!(p.pending_records(), 3);
        assert_eq!(p.acked_through(), 0);
        assert!(p.set_status(1, Acknowledged));
        assert_eq!(p.low_water_mark(), 2);
        assert_eq!(p.pending_records(), 1);
        assert!(!p.set_status(1, Unsent), "erased records stay erased");
    }

    #[test]
    fn test_fragment_tracking() {
        let mut p = proxy();
        p.add_record(1, Unsent, true, 3).expect("add");
        assert_eq!(p.record(1).map(|r| r.unsent_fragments()), Some(vec![1, 2, 3]));
        assert!(!p.mark_fragment_sent(1, 1));
        assert!(!p.mark_fragment_sent(1, 3));
        assert!(p.mark_fragment_sent(1, 2));
        p.set_status(1, Underway);

        let set = FragmentNumberSet::from_fragments(2, &[2]).expect("set");
        assert!(!p.mark_fragment_requested(1, &set), "suppressed while underway");
        assert_eq!(p.record(1).map(|r| r.unsent_fragments()), Some(vec![]));

        p.set_status(1, Unacknowledged);
        assert!(p.mark_fragment_requested(1, &set));
        assert_eq!(p.record(1).map(|r| r.status()), Some(Requested));
        assert_eq!(p.record(1).map(|r| r.unsent_fragments()), Some(vec![2]));
    }

    #[test]
    fn test_fragment_request_does_not_downgrade_unsent() {
        let mut p = proxy();
        p.add_record(1, Unsent, true, 2).expect("add");
        p.mark_fragment_sent(1, 1);
        let set = FragmentNumberSet::from_fragments(1, &[1]).expect("set");
        assert!(p.mark_fragment_requested(1, &set));
        assert_eq!(p.record(1).map(|r| r.status()), Some(Unsent));
        assert_eq!(p.record(1).map(|r| r.unsent_fragments()), Some(vec![1, 2]));
    }

    #[test]
    fn test_bulk_transition_and_expiry() {
        let mut p = proxy();
        for seq in 1..=4 {
            p.add_record(seq, Requested, true, 0).expect("add");
        }
        p.set_status(4, Underway);
        assert_eq!(p.bulk_transition(Requested, Unsent), vec![1, 2, 3]);
        assert_eq!(p.unsent_sequences(), vec![1, 2, 3]);

        let later = Instant::now() + Duration::from_secs(1);
        let (expired, next) = p.expire_underway(later, Duration::from_millis(10));
        assert_eq!(expired, 1);
        assert!(next.is_none());
        assert_eq!(p.record(4).map(|r| r.status()), Some(Unacknowledged));
    }

    #[test]
    fn test_counter_suppression() {
        let mut p = proxy();
        assert!(p.check_acknack_count(1));
        assert!(!p.check_acknack_count(1));
        assert!(!p.check_acknack_count(0));
        assert!(p.check_acknack_count(5));
        // Separate counter per message kind
        assert!(p.check_nackfrag_count(1));
    }

    #[test]
    fn test_invalidate() {
        let mut p = proxy();
        p.add_record(1, Unsent, true, 4).expect("add");
        p.invalidate(1);
        let record = p.record(1).expect("record");
        assert!(!record.is_relevant());
        assert!(!record.is_fragmented());
        assert_eq!(record.status(), Unacknowledged);
        assert!(p.is_acknowledged(1));
    }
}
