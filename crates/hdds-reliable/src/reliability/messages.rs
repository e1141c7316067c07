// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS reliability protocol messages
//!
//! Semantic values of the submessages exchanged by a reliable writer:
//! - HEARTBEAT: writer announces its available sequence range
//! - ACKNACK: reader acknowledges and/or requests resends
//! - NACKFRAG: reader requests missing fragments of one sample
//! - DATA / DATA_FRAG: full or fragmented sample payload
//! - GAP: writer declares sequences irrelevant or unavailable
//!
//! Wire encoding is the serialization layer's concern; only the fields that
//! drive the reliability protocol are modelled here.

use std::ops::Range;
use std::sync::Arc;

use super::rtps_range::{coalesce, RtpsRange};
use crate::types::{CacheChange, FragmentNumber, Guid, SequenceNumber};

pub const MAX_BITMAP_BITS: u32 = 256;
pub const WORD_BITS: u32 = 32;
pub const BITMAP_WORDS: usize = 8;

// ============================================================================
// Bitmap sets
// ============================================================================

/// 256-bit MSB-first bitmap shared by sequence and fragment number sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Bitmap {
    num_bits: u32,
    words: [u32; BITMAP_WORDS],
}

impl Bitmap {
    fn set(&mut self, offset: u64) -> bool {
        if offset >= u64::from(MAX_BITMAP_BITS) {
            return false;
        }
        let offset = offset as u32;
        self.words[(offset / WORD_BITS) as usize] |= 1 << (31 - offset % WORD_BITS);
        self.num_bits = self.num_bits.max(offset + 1);
        true
    }

    fn is_set(&self, offset: u64) -> bool {
        if offset >= u64::from(self.num_bits) {
            return false;
        }
        let offset = offset as u32;
        self.words[(offset / WORD_BITS) as usize] & (1 << (31 - offset % WORD_BITS)) != 0
    }

    fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        (0..u64::from(self.num_bits)).filter(|&off| self.is_set(off))
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

/// SequenceNumberSet used by ACKNACK and GAP submessages.
///
/// Holds a base plus up to 256 sequence numbers in `[base, base + 256)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumberSet {
    base: SequenceNumber,
    bitmap: Bitmap,
}

impl SequenceNumberSet {
    /// Maximum number of bitmap bits (RTPS limit).
    pub const MAX_BITS: u32 = MAX_BITMAP_BITS;

    /// Create an empty set with the provided base sequence number.
    pub fn empty(base: SequenceNumber) -> Self {
        Self {
            base,
            bitmap: Bitmap::default(),
        }
    }

    /// Create from explicit sequence numbers (must be >= base and < base + 256).
    pub fn from_sequences(base: SequenceNumber, sequences: &[SequenceNumber]) -> Option<Self> {
        let mut set = Self::empty(base);
        for &seq in sequences {
            if !set.insert(seq) {
                return None;
            }
        }
        Some(set)
    }

    /// Add `seq` to the set; false if it falls outside the bitmap window.
    pub fn insert(&mut self, seq: SequenceNumber) -> bool {
        seq >= self.base && self.bitmap.set(seq - self.base)
    }

    /// Base sequence number of the set.
    pub fn base(&self) -> SequenceNumber {
        self.base
    }

    /// Number of bitmap bits actually used.
    pub fn num_bits(&self) -> u32 {
        self.bitmap.num_bits
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        seq >= self.base && self.bitmap.is_set(seq - self.base)
    }

    /// Highest sequence number contained in the set.
    pub fn last(&self) -> Option<SequenceNumber> {
        self.iter().last()
    }

    /// Iterate through all sequence numbers contained in the set.
    pub fn iter(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.bitmap.offsets().map(move |off| self.base + off)
    }
}

/// FragmentNumberSet used by NACKFRAG submessages (fragment numbers start at 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentNumberSet {
    base: FragmentNumber,
    bitmap: Bitmap,
}

impl FragmentNumberSet {
    pub fn empty(base: FragmentNumber) -> Self {
        Self {
            base,
            bitmap: Bitmap::default(),
        }
    }

    /// Create from explicit fragment numbers (must be >= base and < base + 256).
    pub fn from_fragments(base: FragmentNumber, fragments: &[FragmentNumber]) -> Option<Self> {
        let mut set = Self::empty(base);
        for &frag in fragments {
            if frag < base || !set.bitmap.set(u64::from(frag - base)) {
                return None;
            }
        }
        Some(set)
    }

    pub fn base(&self) -> FragmentNumber {
        self.base
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn contains(&self, frag: FragmentNumber) -> bool {
        frag >= self.base && self.bitmap.is_set(u64::from(frag - self.base))
    }

    pub fn iter(&self) -> impl Iterator<Item = FragmentNumber> + '_ {
        self.bitmap
            .offsets()
            .map(move |off| self.base.saturating_add(off as FragmentNumber))
    }
}

// ============================================================================
// HEARTBEAT
// ============================================================================

/// Heartbeat message (RTPS HEARTBEAT submessage per DDS-RTPS v2.5 Sec.8.3.7.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMsg {
    pub writer_guid: Guid,
    /// Addressed reader, or `Guid::unknown()` for every matched reader.
    pub reader_guid: Guid,
    /// First (oldest) sequence number in writer's cache.
    pub first_seq: SequenceNumber,
    /// Last (newest) sequence number written by writer.
    pub last_seq: SequenceNumber,
    /// Monotonic heartbeat counter (anti-replay).
    pub count: u32,
    /// Final flag: the writer does not require a response.
    pub final_flag: bool,
}

impl HeartbeatMsg {
    /// True if the writer announced an empty range (nothing available).
    pub fn is_empty_range(&self) -> bool {
        self.last_seq < self.first_seq
    }
}

// ============================================================================
// ACKNACK / NACKFRAG
// ============================================================================

/// ACKNACK message (reader -> writer, RTPS ACKNACK submessage per DDS-RTPS v2.5 Sec.8.3.7.1).
///
/// Everything below `reader_sn_state.base()` is acknowledged; every sequence
/// set in the bitmap is requested. An empty bitmap with `final_flag == false`
/// asks the writer for a fresh HEARTBEAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckNackMsg {
    pub reader_guid: Guid,
    pub writer_guid: Guid,
    pub reader_sn_state: SequenceNumberSet,
    pub count: u32,
    pub final_flag: bool,
}

impl AckNackMsg {
    /// Pure acknowledgement of everything below `base`.
    pub fn ack(reader_guid: Guid, writer_guid: Guid, base: SequenceNumber, count: u32) -> Self {
        Self {
            reader_guid,
            writer_guid,
            reader_sn_state: SequenceNumberSet::empty(base),
            count,
            final_flag: true,
        }
    }

    /// Acknowledge below `base` and request the listed sequences.
    ///
    /// Returns `None` if a requested sequence is outside `[base, base + 256)`.
    pub fn nack(
        reader_guid: Guid,
        writer_guid: Guid,
        base: SequenceNumber,
        missing: &[SequenceNumber],
        count: u32,
    ) -> Option<Self> {
        Some(Self {
            reader_guid,
            writer_guid,
            reader_sn_state: SequenceNumberSet::from_sequences(base, missing)?,
            count,
            final_flag: false,
        })
    }

    pub fn base(&self) -> SequenceNumber {
        self.reader_sn_state.base()
    }

    /// True for an explicit request of a fresh HEARTBEAT.
    pub fn is_heartbeat_request(&self) -> bool {
        self.reader_sn_state.is_empty() && !self.final_flag
    }
}

/// NACKFRAG message (reader -> writer, fragment-level resend request).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackFragMsg {
    pub reader_guid: Guid,
    pub writer_guid: Guid,
    pub writer_sn: SequenceNumber,
    pub fragment_number_state: FragmentNumberSet,
    pub count: u32,
}

// ============================================================================
// DATA / DATA_FRAG
// ============================================================================

/// DATA message carrying one complete sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMsg {
    pub change: Arc<CacheChange>,
}

impl DataMsg {
    pub fn sequence_number(&self) -> SequenceNumber {
        self.change.sequence_number
    }
}

/// DATA_FRAG message carrying one fragment of a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragMsg {
    pub change: Arc<CacheChange>,
    /// Fragment carried by this message (1-based).
    pub fragment_number: FragmentNumber,
    pub fragment_size: usize,
    /// Total fragment count of the sample.
    pub fragment_count: FragmentNumber,
}

impl DataFragMsg {
    pub fn sequence_number(&self) -> SequenceNumber {
        self.change.sequence_number
    }

    /// Serialized bytes of the sample (all fragments).
    pub fn sample_size(&self) -> usize {
        self.change.size()
    }

    /// Bytes carried by this fragment.
    pub fn fragment_payload(&self) -> &[u8] {
        self.change.fragment(self.fragment_number, self.fragment_size)
    }
}

// ============================================================================
// GAP
// ============================================================================

/// GAP message (writer -> reader, RTPS GAP submessage per DDS-RTPS v2.5 Sec.8.3.7.4).
///
/// Declares `[gap_start, gap_list.base())` plus every sequence in `gap_list`
/// as irrelevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapMsg {
    writer_guid: Guid,
    gap_start: SequenceNumber,
    gap_list: SequenceNumberSet,
}

impl GapMsg {
    /// Create GAP message from raw components.
    pub fn new(writer_guid: Guid, gap_start: SequenceNumber, gap_list: SequenceNumberSet) -> Self {
        Self {
            writer_guid,
            gap_start,
            gap_list,
        }
    }

    /// GAP for one contiguous range `[start, end)`.
    pub fn contiguous(writer_guid: Guid, range: &RtpsRange) -> Self {
        Self::new(
            writer_guid,
            range.start(),
            SequenceNumberSet::empty(range.end()),
        )
    }

    /// Build the fewest GAP messages covering sorted, deduplicated sequences.
    ///
    /// The first run of each message is encoded as the contiguous prefix;
    /// following sequences go into the bitmap while they fit its window.
    pub fn from_sequences(writer_guid: Guid, sequences: &[SequenceNumber]) -> Vec<Self> {
        let mut gaps = Vec::new();
        let mut runs = coalesce(sequences).into_iter().peekable();
        while let Some(head) = runs.next() {
            let mut list = SequenceNumberSet::empty(head.end());
            while let Some(next) = runs.peek() {
                let window_end = head.end().saturating_add(u64::from(MAX_BITMAP_BITS));
                if next.end() > window_end {
                    break;
                }
                for seq in next.iter() {
                    list.insert(seq);
                }
                runs.next();
            }
            gaps.push(Self::new(writer_guid, head.start(), list));
        }
        gaps
    }

    pub fn writer_guid(&self) -> Guid {
        self.writer_guid
    }

    /// First irrelevant sequence number (inclusive).
    pub fn gap_start(&self) -> SequenceNumber {
        self.gap_start
    }

    /// Bitmap of additional irrelevant sequences.
    pub fn gap_list(&self) -> &SequenceNumberSet {
        &self.gap_list
    }

    /// Expand into explicit sequence numbers.
    pub fn lost_sequences(&self) -> Vec<SequenceNumber> {
        let mut seqs: Vec<_> = (self.gap_start..self.gap_list.base()).collect();
        seqs.extend(self.gap_list.iter());
        seqs
    }

    /// Convert to contiguous ranges `[start, end)`.
    pub fn lost_ranges(&self) -> Vec<Range<SequenceNumber>> {
        coalesce(&self.lost_sequences())
            .into_iter()
            .map(RtpsRange::into_range)
            .collect()
    }
}

// ============================================================================
// Submessage
// ============================================================================

/// Any submessage produced by the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage {
    Data(DataMsg),
    DataFrag(DataFragMsg),
    Gap(GapMsg),
    Heartbeat(HeartbeatMsg),
}

impl Submessage {
    /// Payload bytes accounted against a flow controller byte budget.
    pub fn payload_len(&self) -> usize {
        match self {
            Submessage::Data(data) => data.change.size(),
            Submessage::DataFrag(frag) => frag.fragment_payload().len(),
            Submessage::Gap(_) | Submessage::Heartbeat(_) => 0,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Submessage::Data(_) => "DATA",
            Submessage::DataFrag(_) => "DATA_FRAG",
            Submessage::Gap(_) => "GAP",
            Submessage::Heartbeat(_) => "HEARTBEAT",
        }
    }
}
