// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scheduling disciplines.
//!
//! A discipline decides which bucket an entry goes to and which bucket head
//! the worker tries next. Disciplines never reorder entries inside a bucket.

use std::collections::HashMap;

use super::bandwidth::PeriodBudget;
use super::queue::{BucketKey, ReadyQueues};
use super::FlowWriterProperties;
use crate::config::SchedulingDiscipline;
use crate::types::{Guid, SampleId};

/// Selection policy of a flow controller worker.
pub(crate) trait Scheduler: Send {
    fn register_writer(&mut self, writer: Guid, props: FlowWriterProperties);

    fn unregister_writer(&mut self, writer: &Guid);

    /// Bucket new entries of `writer` are appended to.
    fn bucket_for(&self, writer: &Guid) -> BucketKey;

    /// Next entry to attempt, or `None` if every bucket is empty.
    fn select(&self, queues: &ReadyQueues, budget: &PeriodBudget) -> Option<SampleId>;

    /// Called after an entry taken from `bucket` was delivered.
    fn on_delivered(&mut self, bucket: BucketKey, bytes: usize) {
        let _ = (bucket, bytes);
    }

    /// Called when the bandwidth period restarts.
    fn on_period_reset(&mut self) {}
}

/// Build the scheduler for `discipline`.
pub(crate) fn for_discipline(discipline: SchedulingDiscipline) -> Box<dyn Scheduler> {
    match discipline {
        SchedulingDiscipline::Fifo => Box::new(FifoScheduler),
        SchedulingDiscipline::RoundRobin => Box::new(RoundRobinScheduler::default()),
        SchedulingDiscipline::HighPriority => Box::new(HighPriorityScheduler::default()),
        SchedulingDiscipline::PriorityWithReservation => {
            Box::new(ReservationScheduler::default())
        }
    }
}

fn first_front(queues: &ReadyQueues) -> Option<SampleId> {
    queues
        .buckets()
        .next()
        .and_then(|b| queues.front(b))
        .map(|(id, _)| id)
}

// ============================================================================
// FIFO
// ============================================================================

/// Oldest pending entry overall.
pub(crate) struct FifoScheduler;

impl Scheduler for FifoScheduler {
    fn register_writer(&mut self, _writer: Guid, _props: FlowWriterProperties) {}

    fn unregister_writer(&mut self, _writer: &Guid) {}

    fn bucket_for(&self, _writer: &Guid) -> BucketKey {
        BucketKey::Shared
    }

    fn select(&self, queues: &ReadyQueues, _budget: &PeriodBudget) -> Option<SampleId> {
        queues.front(&BucketKey::Shared).map(|(id, _)| id)
    }
}

// ============================================================================
// Round-robin
// ============================================================================

/// One bucket per writer, served in rotation.
///
/// The rotation only moves past a bucket after one of its entries was
/// delivered, so a failed attempt is retried first.
#[derive(Default)]
pub(crate) struct RoundRobinScheduler {
    last_served: Option<BucketKey>,
}

impl Scheduler for RoundRobinScheduler {
    fn register_writer(&mut self, _writer: Guid, _props: FlowWriterProperties) {}

    fn unregister_writer(&mut self, writer: &Guid) {
        if self.last_served == Some(BucketKey::Writer(0, *writer)) {
            self.last_served = None;
        }
    }

    fn bucket_for(&self, writer: &Guid) -> BucketKey {
        BucketKey::Writer(0, *writer)
    }

    fn select(&self, queues: &ReadyQueues, _budget: &PeriodBudget) -> Option<SampleId> {
        let next = match self.last_served {
            Some(last) => queues
                .buckets()
                .find(|b| **b > last)
                .or_else(|| queues.buckets().next()),
            None => queues.buckets().next(),
        }?;
        queues.front(next).map(|(id, _)| id)
    }

    fn on_delivered(&mut self, bucket: BucketKey, _bytes: usize) {
        self.last_served = Some(bucket);
    }
}

// ============================================================================
// Strict priority
// ============================================================================

/// One bucket per priority class, lowest value first.
#[derive(Default)]
pub(crate) struct HighPriorityScheduler {
    priorities: HashMap<Guid, i32>,
}

impl Scheduler for HighPriorityScheduler {
    fn register_writer(&mut self, writer: Guid, props: FlowWriterProperties) {
        self.priorities.insert(writer, props.priority);
    }

    fn unregister_writer(&mut self, writer: &Guid) {
        self.priorities.remove(writer);
    }

    fn bucket_for(&self, writer: &Guid) -> BucketKey {
        BucketKey::Priority(self.priorities.get(writer).copied().unwrap_or_default())
    }

    fn select(&self, queues: &ReadyQueues, _budget: &PeriodBudget) -> Option<SampleId> {
        first_front(queues)
    }
}

// ============================================================================
// Priority with bandwidth reservation
// ============================================================================

/// Priority order, but a writer still under its reserved share of the period
/// budget is served before writers that already used theirs.
#[derive(Default)]
pub(crate) struct ReservationScheduler {
    props: HashMap<Guid, FlowWriterProperties>,
    sent_this_period: HashMap<Guid, usize>,
}

impl ReservationScheduler {
    fn under_reservation(&self, writer: &Guid, max_bytes: usize) -> bool {
        let Some(props) = self.props.get(writer) else {
            return false;
        };
        if props.bandwidth_reservation == 0 {
            return false;
        }
        let share = max_bytes / 100 * props.bandwidth_reservation as usize
            + max_bytes % 100 * props.bandwidth_reservation as usize / 100;
        self.sent_this_period.get(writer).copied().unwrap_or(0) < share
    }
}

impl Scheduler for ReservationScheduler {
    fn register_writer(&mut self, writer: Guid, props: FlowWriterProperties) {
        self.props.insert(writer, props);
    }

    fn unregister_writer(&mut self, writer: &Guid) {
        self.props.remove(writer);
        self.sent_this_period.remove(writer);
    }

    fn bucket_for(&self, writer: &Guid) -> BucketKey {
        let priority = self.props.get(writer).map(|p| p.priority).unwrap_or_default();
        BucketKey::Writer(priority, *writer)
    }

    fn select(&self, queues: &ReadyQueues, budget: &PeriodBudget) -> Option<SampleId> {
        if let Some(max_bytes) = budget.max_bytes() {
            let reserved = queues.buckets().find(|bucket| match bucket {
                BucketKey::Writer(_, writer) => self.under_reservation(writer, max_bytes),
                _ => false,
            });
            if let Some(bucket) = reserved {
                return queues.front(bucket).map(|(id, _)| id);
            }
        }
        first_front(queues)
    }

    fn on_delivered(&mut self, bucket: BucketKey, bytes: usize) {
        if let BucketKey::Writer(_, writer) = bucket {
            *self.sent_this_period.entry(writer).or_default() += bytes;
        }
    }

    fn on_period_reset(&mut self) {
        self.sent_this_period.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn writer(n: u8) -> Guid {
        Guid::new([n; 12], [0, 0, 1, 0x02])
    }

    fn props(priority: i32, bandwidth_reservation: u8) -> FlowWriterProperties {
        FlowWriterProperties {
            priority,
            bandwidth_reservation,
        }
    }

    fn enqueue(sched: &dyn Scheduler, q: &mut ReadyQueues, w: u8, seq: u64, ticket: u64) {
        q.push_back(sched.bucket_for(&writer(w)), SampleId::new(writer(w), seq), ticket);
    }

    #[test]
    fn test_fifo_single_bucket() {
        let sched = FifoScheduler;
        let mut q = ReadyQueues::new();
        enqueue(&sched, &mut q, 2, 1, 1);
        enqueue(&sched, &mut q, 1, 1, 2);
        let budget = PeriodBudget::unlimited(Duration::from_millis(100));
        assert_eq!(sched.select(&q, &budget), Some(SampleId::new(writer(2), 1)));
    }

    #[test]
    fn test_round_robin_advances_only_on_delivery() {
        let mut sched = RoundRobinScheduler::default();
        let mut q = ReadyQueues::new();
        enqueue(&sched, &mut q, 1, 1, 1);
        enqueue(&sched, &mut q, 1, 2, 2);
        enqueue(&sched, &mut q, 2, 1, 3);
        let budget = PeriodBudget::unlimited(Duration::from_millis(100));

        let first = sched.select(&q, &budget).expect("entry");
        assert_eq!(first, SampleId::new(writer(1), 1));
        // Failed attempt: same entry again
        assert_eq!(sched.select(&q, &budget), Some(first));

        let bucket = q.bucket_of(&first).expect("queued");
        q.remove(&first);
        sched.on_delivered(bucket, 10);
        assert_eq!(sched.select(&q, &budget), Some(SampleId::new(writer(2), 1)));

        let second = SampleId::new(writer(2), 1);
        let bucket = q.bucket_of(&second).expect("queued");
        q.remove(&second);
        sched.on_delivered(bucket, 10);
        // Wraps around
        assert_eq!(sched.select(&q, &budget), Some(SampleId::new(writer(1), 2)));
    }

    #[test]
    fn test_high_priority_lowest_value_first() {
        let mut sched = HighPriorityScheduler::default();
        sched.register_writer(writer(1), props(10, 0));
        sched.register_writer(writer(2), props(-5, 0));
        let mut q = ReadyQueues::new();
        enqueue(&sched, &mut q, 1, 1, 1);
        enqueue(&sched, &mut q, 2, 1, 2);
        let budget = PeriodBudget::unlimited(Duration::from_millis(100));
        assert_eq!(sched.select(&q, &budget), Some(SampleId::new(writer(2), 1)));
    }

    #[test]
    fn test_reservation_prefers_writer_under_share() {
        let mut sched = ReservationScheduler::default();
        sched.register_writer(writer(1), props(0, 0));
        sched.register_writer(writer(2), props(5, 50));
        let mut q = ReadyQueues::new();
        enqueue(&sched, &mut q, 1, 1, 1);
        enqueue(&sched, &mut q, 2, 1, 2);
        let budget = PeriodBudget::new(Some(1000), Duration::from_millis(100));

        // Writer 2 has priority 5 but an unused 50% reservation
        assert_eq!(sched.select(&q, &budget), Some(SampleId::new(writer(2), 1)));

        sched.on_delivered(BucketKey::Writer(5, writer(2)), 500);
        // Share used up: strict priority again
        assert_eq!(sched.select(&q, &budget), Some(SampleId::new(writer(1), 1)));

        sched.on_period_reset();
        assert_eq!(sched.select(&q, &budget), Some(SampleId::new(writer(2), 1)));
    }
}
