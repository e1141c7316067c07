// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Drain-ready queues of a flow controller.
//!
//! Entries live in one arena and are linked into per-bucket doubly-linked
//! lists by index, so an entry can be unlinked or moved in O(1) given its
//! `SampleId` without the sample itself carrying queue links.

use std::collections::{BTreeMap, HashMap};

use crate::types::{Guid, SampleId};

/// Ordering structure an entry is placed into.
///
/// The derived `Ord` is the service order used by priority disciplines:
/// lower priority values first, then writer GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum BucketKey {
    /// One bucket for everything (FIFO)
    Shared,
    /// One bucket per priority class
    Priority(i32),
    /// One bucket per writer
    Writer(i32, Guid),
}

#[derive(Debug)]
struct Node {
    id: SampleId,
    ticket: u64,
    bucket: BucketKey,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct List {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// Arena of queue entries plus per-bucket ordered lists.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueues {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<SampleId, usize>,
    buckets: BTreeMap<BucketKey, List>,
}

impl ReadyQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append `id` at the tail of `bucket`.
    ///
    /// Returns `false` (and leaves the queue untouched) if `id` is already queued.
    pub(crate) fn push_back(&mut self, bucket: BucketKey, id: SampleId, ticket: u64) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }

        let list = self.buckets.entry(bucket).or_default();
        let node = Node {
            id,
            ticket,
            bucket,
            prev: list.tail,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        let list = self.buckets.entry(bucket).or_default();
        match list.tail {
            Some(tail) => {
                if let Some(tail_node) = self.nodes[tail].as_mut() {
                    tail_node.next = Some(slot);
                }
            }
            None => list.head = Some(slot),
        }
        list.tail = Some(slot);
        list.len += 1;
        self.index.insert(id, slot);
        true
    }

    /// Unlink `id` from whatever bucket holds it.
    pub(crate) fn remove(&mut self, id: &SampleId) -> bool {
        let Some(slot) = self.index.remove(id) else {
            return false;
        };
        let Some(node) = self.nodes[slot].take() else {
            return false;
        };

        if let Some(prev) = node.prev {
            if let Some(prev_node) = self.nodes[prev].as_mut() {
                prev_node.next = node.next;
            }
        }
        if let Some(next) = node.next {
            if let Some(next_node) = self.nodes[next].as_mut() {
                next_node.prev = node.prev;
            }
        }
        if let Some(list) = self.buckets.get_mut(&node.bucket) {
            if list.head == Some(slot) {
                list.head = node.next;
            }
            if list.tail == Some(slot) {
                list.tail = node.prev;
            }
            list.len -= 1;
            if list.len == 0 {
                self.buckets.remove(&node.bucket);
            }
        }
        self.free.push(slot);
        true
    }

    /// Unlink `id` and return its ticket.
    pub(crate) fn remove_entry(&mut self, id: &SampleId) -> Option<u64> {
        let ticket = self.ticket_of(id)?;
        self.remove(id);
        Some(ticket)
    }

    fn ticket_of(&self, id: &SampleId) -> Option<u64> {
        let slot = *self.index.get(id)?;
        self.nodes[slot].as_ref().map(|n| n.ticket)
    }

    /// Oldest entry of `bucket`.
    pub(crate) fn front(&self, bucket: &BucketKey) -> Option<(SampleId, u64)> {
        let head = self.buckets.get(bucket)?.head?;
        self.nodes[head].as_ref().map(|n| (n.id, n.ticket))
    }

    /// Non-empty buckets in service order.
    pub(crate) fn buckets(&self) -> impl Iterator<Item = &BucketKey> {
        self.buckets.keys()
    }

    pub(crate) fn bucket_of(&self, id: &SampleId) -> Option<BucketKey> {
        let slot = *self.index.get(id)?;
        self.nodes[slot].as_ref().map(|n| n.bucket)
    }

    pub(crate) fn contains(&self, id: &SampleId) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entries of `bucket` from head to tail.
    pub(crate) fn bucket_entries(&self, bucket: BucketKey) -> Vec<(SampleId, u64)> {
        let mut out = Vec::new();
        let mut cursor = self.buckets.get(&bucket).and_then(|l| l.head);
        while let Some(slot) = cursor {
            match self.nodes[slot].as_ref() {
                Some(node) => {
                    out.push((node.id, node.ticket));
                    cursor = node.next;
                }
                None => break,
            }
        }
        out
    }

    /// Remove every entry produced by `writer`.
    pub(crate) fn remove_writer(&mut self, writer: &Guid) -> usize {
        let ids: Vec<SampleId> = self
            .index
            .keys()
            .filter(|id| id.writer == *writer)
            .copied()
            .collect();
        for id in &ids {
            self.remove(id);
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(n: u8) -> Guid {
        Guid::new([n; 12], [0, 0, 1, 0x02])
    }

    fn id(n: u8, seq: u64) -> SampleId {
        SampleId::new(writer(n), seq)
    }

    #[test]
    fn test_push_front_remove() {
        let mut q = ReadyQueues::new();
        assert!(q.push_back(BucketKey::Shared, id(1, 1), 1));
        assert!(q.push_back(BucketKey::Shared, id(1, 2), 2));
        assert!(q.push_back(BucketKey::Shared, id(1, 3), 3));
        assert!(!q.push_back(BucketKey::Shared, id(1, 2), 4), "duplicate refused");

        assert!(q.remove(&id(1, 2)));
        assert_eq!(
            q.bucket_entries(BucketKey::Shared),
            vec![(id(1, 1), 1), (id(1, 3), 3)]
        );
        assert!(q.remove(&id(1, 1)));
        assert_eq!(q.front(&BucketKey::Shared), Some((id(1, 3), 3)));
        assert!(q.remove(&id(1, 3)));
        assert!(q.is_empty());
        assert_eq!(q.buckets().count(), 0, "empty buckets are dropped");
    }

    #[test]
    fn test_slots_are_reused() {
        let mut q = ReadyQueues::new();
        for seq in 0..10 {
            q.push_back(BucketKey::Shared, id(1, seq), seq);
            q.remove(&id(1, seq));
        }
        assert_eq!(q.nodes.len(), 1);
    }

    #[test]
    fn test_bucket_order_and_move() {
        let mut q = ReadyQueues::new();
        q.push_back(BucketKey::Priority(5), id(1, 1), 1);
        q.push_back(BucketKey::Priority(-1), id(2, 1), 2);
        let order: Vec<_> = q.buckets().copied().collect();
        assert_eq!(order, vec![BucketKey::Priority(-1), BucketKey::Priority(5)]);

        let ticket = q.remove_entry(&id(1, 1)).expect("queued");
        q.push_back(BucketKey::Priority(-1), id(1, 1), ticket);
        assert_eq!(
            q.bucket_entries(BucketKey::Priority(-1)),
            vec![(id(2, 1), 2), (id(1, 1), 1)]
        );
        assert_eq!(q.bucket_of(&id(1, 1)), Some(BucketKey::Priority(-1)));
    }

    #[test]
    fn test_remove_writer() {
        let mut q = ReadyQueues::new();
        q.push_back(BucketKey::Writer(0, writer(1)), id(1, 1), 1);
        q.push_back(BucketKey::Writer(0, writer(2)), id(2, 1), 2);
        q.push_back(BucketKey::Writer(0, writer(1)), id(1, 2), 3);
        assert_eq!(q.remove_writer(&writer(1)), 2);
        assert_eq!(q.len(), 1);
        assert!(q.contains(&id(2, 1)));
    }
}
