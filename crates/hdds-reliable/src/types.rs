// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core identifiers and the sample type.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// RTPS GUID prefix (12 bytes).
pub type GuidPrefix = [u8; 12];
/// RTPS entity ID (4 bytes).
pub type EntityId = [u8; 4];
/// Per-writer sequence number. Valid sequence numbers start at 1.
pub type SequenceNumber = u64;
/// Fragment number inside a DATA_FRAG sample. Valid fragment numbers start at 1.
pub type FragmentNumber = u32;

/// RTPS constant: ENTITYID_UNKNOWN.
pub const ENTITYID_UNKNOWN: EntityId = [0x00, 0x00, 0x00, 0x00];

/// Entity kinds that identify a reader endpoint (last entity ID byte).
const READER_ENTITY_KINDS: [u8; 4] = [0x04, 0x07, 0xC4, 0xC7];

/// RTPS GUID (Globally Unique Identifier)
///
/// # Display Format
/// Hex with dots: "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    /// Create GUID from separate prefix and entity ID
    pub const fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    /// GUID_UNKNOWN (all zeros).
    pub const fn unknown() -> Self {
        Self {
            prefix: [0; 12],
            entity_id: ENTITYID_UNKNOWN,
        }
    }

    /// Create GUID from raw bytes (16 bytes total)
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self { prefix, entity_id }
    }

    /// Convert GUID to 16-byte array
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix);
        bytes[12..16].copy_from_slice(&self.entity_id);
        bytes
    }

    /// True for GUID_UNKNOWN or a GUID with an unknown prefix/entity part.
    pub fn is_unknown(&self) -> bool {
        self.prefix.iter().all(|&b| b == 0) || self.entity_id == ENTITYID_UNKNOWN
    }

    /// True if the entity kind designates a (user or builtin) reader.
    pub fn is_reader(&self) -> bool {
        !self.is_unknown() && READER_ENTITY_KINDS.contains(&self.entity_id[3])
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.prefix.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        for byte in &self.entity_id {
            write!(f, ".{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

/// Stable identity of one sample: (writer GUID, sequence number).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SampleId {
    pub writer: Guid,
    pub seq: SequenceNumber,
}

impl SampleId {
    pub const fn new(writer: Guid, seq: SequenceNumber) -> Self {
        Self { writer, seq }
    }
}

/// Instance lifecycle carried by a sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChangeKind {
    #[default]
    Alive,
    Disposed,
    Unregistered,
}

/// One immutable unit of published data (RTPS CacheChange).
///
/// Owned by the writer history; everything else holds `Arc` clones or the
/// sequence number only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheChange {
    pub writer_guid: Guid,
    pub sequence_number: SequenceNumber,
    pub kind: ChangeKind,
    /// Serialized payload (encoding is the caller's concern).
    pub payload: Arc<[u8]>,
    /// Source timestamp, nanoseconds since UNIX epoch.
    pub source_timestamp_ns: u64,
    /// Instance key hash (0 = unkeyed / default instance).
    pub instance_key: u64,
}

impl CacheChange {
    /// Create a change stamped with the current wall clock.
    pub fn new(
        writer_guid: Guid,
        sequence_number: SequenceNumber,
        kind: ChangeKind,
        payload: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            writer_guid,
            sequence_number,
            kind,
            payload: payload.into(),
            source_timestamp_ns: current_time_ns(),
            instance_key: 0,
        }
    }

    /// Attach an instance key hash.
    #[must_use]
    pub fn with_instance_key(mut self, instance_key: u64) -> Self {
        self.instance_key = instance_key;
        self
    }

    pub fn id(&self) -> SampleId {
        SampleId::new(self.writer_guid, self.sequence_number)
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Number of DATA_FRAG fragments needed for `fragment_size`, or 0 when the
    /// sample fits in a single DATA submessage.
    pub fn fragment_count(&self, fragment_size: usize) -> FragmentNumber {
        if fragment_size == 0 || self.payload.len() <= fragment_size {
            return 0;
        }
        let count = self.payload.len().div_ceil(fragment_size);
        FragmentNumber::try_from(count).unwrap_or(FragmentNumber::MAX)
    }

    /// Payload bytes of fragment `frag` (1-based).
    pub fn fragment(&self, frag: FragmentNumber, fragment_size: usize) -> &[u8] {
        let idx = (frag.saturating_sub(1) as usize).saturating_mul(fragment_size);
        let start = idx.min(self.payload.len());
        let end = start.saturating_add(fragment_size).min(self.payload.len());
        &self.payload[start..end]
    }
}

/// Wall clock in nanoseconds since UNIX epoch (0 if the clock is before the epoch).
pub fn current_time_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
