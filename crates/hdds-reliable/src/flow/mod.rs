// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Flow Controllers
//!
//! Decouple "sample ready to send" from "sample on the wire".
//!
//! ```text
//! submit_new ----+                                   +--> FIFO
//!                |--> incoming (new | resend) --merge+--> round-robin --> client.deliver_queued()
//! submit_resend -+     short critical section        +--> priority (+reservation)
//!                                                      drain-ready buckets
//!                                                      (worker critical section)
//! ```
//!
//! - **Synchronous modes** send on the caller thread. `SyncWithFallback`
//!   queues failed sends for the worker; `PureSync` reports them.
//! - **Asynchronous modes** always go through the worker thread, which merges
//!   the incoming lists into the drain-ready buckets and drains them.
//! - **Bandwidth limiting** caps the bytes sent per period; the worker sleeps
//!   until the next period boundary when the budget is spent.
//!
//! An entry that could not be delivered stays at its position and the drain
//! pass stops, so entries of one writer are never reordered.

mod bandwidth;
mod queue;
mod registry;
mod scheduler;
mod wake;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

pub use bandwidth::ByteBudget;
pub use registry::FlowControllerRegistry;

use bandwidth::PeriodBudget;
use queue::ReadyQueues;
use scheduler::Scheduler;
use wake::WakeSignal;

use crate::config::{FlowControllerConfig, PublishMode, LENGTH_UNLIMITED};
use crate::error::{Error, Result};
use crate::types::{Guid, SampleId, SequenceNumber};

/// Scheduling properties of one writer attached to a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowWriterProperties {
    /// Lower value is served first by the priority disciplines.
    pub priority: i32,
    /// Percentage of the period budget reserved for this writer.
    pub bandwidth_reservation: u8,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Nothing left to send for this sample (including "nothing to do").
    Delivered { bytes: usize },
    /// The byte budget ran out before the sample was fully sent.
    ExceededLimit { bytes: usize },
    /// Transient failure (destination busy, transport back-pressure).
    NotDelivered { bytes: usize },
}

impl DeliveryResult {
    pub fn bytes(&self) -> usize {
        match *self {
            DeliveryResult::Delivered { bytes }
            | DeliveryResult::ExceededLimit { bytes }
            | DeliveryResult::NotDelivered { bytes } => bytes,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }
}

/// Writer side of a flow controller.
///
/// The worker calls back into the writer to send one queued sample to every
/// reader that still needs it.
pub trait FlowControllerClient: Send + Sync {
    /// Deliver sample `seq` within `budget` (`None` = unlimited).
    fn deliver_queued(&self, seq: SequenceNumber, budget: Option<ByteBudget>) -> DeliveryResult;
}

/// Flow controller counters.
#[derive(Debug, Default)]
struct FlowMetrics {
    submitted_new: AtomicU64,
    submitted_resend: AtomicU64,
    coalesced: AtomicU64,
    delivered_inline: AtomicU64,
    delivered_queued: AtomicU64,
    fallback_enqueued: AtomicU64,
    delivery_failures: AtomicU64,
    budget_deferrals: AtomicU64,
    discarded: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Point-in-time copy of a flow controller's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowMetricsSnapshot {
    pub submitted_new: u64,
    pub submitted_resend: u64,
    /// Submissions merged into an entry already pending for the same sample.
    pub coalesced: u64,
    pub delivered_inline: u64,
    pub delivered_queued: u64,
    /// Synchronous sends that fell back to the worker.
    pub fallback_enqueued: u64,
    pub delivery_failures: u64,
    /// Drain passes stopped by an exhausted byte budget.
    pub budget_deferrals: u64,
    /// Entries dropped because their writer went away.
    pub discarded: u64,
    pub bytes_sent: u64,
    /// Entries currently queued.
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitKind {
    New,
    Resend,
}

#[derive(Debug, Clone, Copy)]
struct Ticketed {
    ticket: u64,
    id: SampleId,
}

#[derive(Debug, Default)]
struct Incoming {
    new_samples: VecDeque<Ticketed>,
    resends: VecDeque<Ticketed>,
}

struct ClientSlot {
    client: Weak<dyn FlowControllerClient>,
    pending: AtomicUsize,
}

struct Ready {
    queues: ReadyQueues,
    scheduler: Box<dyn Scheduler>,
    budget: PeriodBudget,
}

struct FlowShared {
    config: FlowControllerConfig,
    clients: RwLock<HashMap<Guid, Arc<ClientSlot>>>,
    next_ticket: AtomicU64,
    /// Producer-side critical section
    incoming: Mutex<Incoming>,
    /// Worker-side critical section
    ready: Mutex<Ready>,
    /// Samples with a pending entry (incoming or ready)
    queued: DashMap<SampleId, ()>,
    pending: AtomicUsize,
    wake: WakeSignal,
    stop: AtomicBool,
    metrics: FlowMetrics,
}

/// Delivery scheduler shared by one or more writers.
pub struct FlowController {
    shared: Arc<FlowShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FlowController {
    /// Create a controller; asynchronous and fallback modes spawn their worker.
    pub fn new(config: FlowControllerConfig) -> Result<Self> {
        config.validate()?;

        let budget = if config.is_bandwidth_limited() && config.max_bytes_per_period != LENGTH_UNLIMITED
        {
            PeriodBudget::new(Some(config.max_bytes_per_period), config.period)
        } else {
            PeriodBudget::unlimited(config.period)
        };

        let shared = Arc::new(FlowShared {
            clients: RwLock::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            incoming: Mutex::new(Incoming::default()),
            ready: Mutex::new(Ready {
                queues: ReadyQueues::new(),
                scheduler: scheduler::for_discipline(config.scheduling),
                budget,
            }),
            queued: DashMap::new(),
            pending: AtomicUsize::new(0),
            wake: WakeSignal::new(),
            stop: AtomicBool::new(false),
            metrics: FlowMetrics::default(),
            config,
        });

        let worker = if shared.config.publish_mode == PublishMode::PureSync {
            None
        } else {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("hdds-flow-{}", shared.config.name))
                .spawn(move || worker_shared.run())?;
            Some(handle)
        };

        log::debug!(
            "[flow] controller '{}' created: {:?} / {:?}",
            shared.config.name,
            shared.config.publish_mode,
            shared.config.scheduling
        );

        Ok(Self {
            shared,
            worker: Mutex::new(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &FlowControllerConfig {
        &self.shared.config
    }

    /// Attach a writer.
    pub fn register_writer(
        &self,
        writer: Guid,
        props: FlowWriterProperties,
        client: Weak<dyn FlowControllerClient>,
    ) -> Result<()> {
        {
            let mut clients = self.shared.clients.write();
            if clients.contains_key(&writer) {
                return Err(Error::InvalidConfig(format!(
                    "writer {} already registered with flow controller '{}'",
                    writer, self.shared.config.name
                )));
            }
            clients.insert(
                writer,
                Arc::new(ClientSlot {
                    client,
                    pending: AtomicUsize::new(0),
                }),
            );
        }
        self.shared.ready.lock().scheduler.register_writer(writer, props);
        log::debug!(
            "[flow] '{}' registered writer {} (priority={}, reservation={}%)",
            self.shared.config.name,
            writer,
            props.priority,
            props.bandwidth_reservation
        );
        Ok(())
    }

    /// Change the scheduling properties of an attached writer.
    ///
    /// Entries already queued follow the writer into its new bucket.
    pub fn set_writer_properties(&self, writer: &Guid, props: FlowWriterProperties) {
        if !self.shared.clients.read().contains_key(writer) {
            return;
        }
        let mut ready = self.shared.ready.lock();
        let old = ready.scheduler.bucket_for(writer);
        ready.scheduler.register_writer(*writer, props);
        let new = ready.scheduler.bucket_for(writer);
        if old != new {
            let entries: Vec<SampleId> = ready
                .queues
                .bucket_entries(old)
                .into_iter()
                .map(|(id, _)| id)
                .filter(|id| id.writer == *writer)
                .collect();
            for id in entries {
                if let Some(ticket) = ready.queues.remove_entry(&id) {
                    ready.queues.push_back(new, id, ticket);
                }
            }
        }
    }

    /// Detach a writer and drop all of its pending entries.
    pub fn unregister_writer(&self, writer: &Guid) {
        if self.shared.clients.write().remove(writer).is_none() {
            return;
        }
        let mut dropped = {
            let mut incoming = self.shared.incoming.lock();
            let before = incoming.new_samples.len() + incoming.resends.len();
            incoming.new_samples.retain(|t| t.id.writer != *writer);
            incoming.resends.retain(|t| t.id.writer != *writer);
            before - incoming.new_samples.len() - incoming.resends.len()
        };
        {
            let mut ready = self.shared.ready.lock();
            dropped += ready.queues.remove_writer(writer);
            ready.scheduler.unregister_writer(writer);
        }
        self.shared.queued.retain(|id, _| id.writer != *writer);
        self.shared.release_pending(dropped);
        log::debug!(
            "[flow] '{}' unregistered writer {} ({} entries dropped)",
            self.shared.config.name,
            writer,
            dropped
        );
    }

    /// Submit a newly written sample.
    ///
    /// In synchronous modes `inline` is invoked on the caller thread with an
    /// unlimited budget; it must perform the send.
    pub fn submit_new(
        &self,
        id: SampleId,
        inline: &mut dyn FnMut(Option<ByteBudget>) -> DeliveryResult,
    ) -> Result<()> {
        self.shared
            .metrics
            .submitted_new
            .fetch_add(1, Ordering::Relaxed);
        self.submit(id, SubmitKind::New, inline)
    }

    /// Submit a sample requested again by a reader.
    pub fn submit_resend(
        &self,
        id: SampleId,
        inline: &mut dyn FnMut(Option<ByteBudget>) -> DeliveryResult,
    ) -> Result<()> {
        self.shared
            .metrics
            .submitted_resend
            .fetch_add(1, Ordering::Relaxed);
        self.submit(id, SubmitKind::Resend, inline)
    }

    fn submit(
        &self,
        id: SampleId,
        kind: SubmitKind,
        inline: &mut dyn FnMut(Option<ByteBudget>) -> DeliveryResult,
    ) -> Result<()> {
        let shared = &self.shared;
        match shared.config.publish_mode {
            PublishMode::PureSync => {
                let result = inline(None);
                shared.account_inline(result);
                if result.is_delivered() {
                    Ok(())
                } else {
                    Err(Error::SendFailed(format!(
                        "flow controller '{}': synchronous send of seq {} failed",
                        shared.config.name, id.seq
                    )))
                }
            }
            PublishMode::SyncWithFallback => {
                // Earlier entries of this writer are still queued: going inline
                // would overtake them.
                if shared.writer_pending(&id.writer) > 0 {
                    shared.enqueue(id, kind);
                    return Ok(());
                }
                let result = inline(None);
                shared.account_inline(result);
                if !result.is_delivered() {
                    shared
                        .metrics
                        .fallback_enqueued
                        .fetch_add(1, Ordering::Relaxed);
                    log::trace!(
                        "[flow] '{}' inline send of {}#{} failed, queued for retry",
                        shared.config.name,
                        id.writer,
                        id.seq
                    );
                    shared.enqueue(id, kind);
                }
                Ok(())
            }
            PublishMode::Async | PublishMode::BandwidthLimitedAsync => {
                shared.enqueue(id, kind);
                Ok(())
            }
        }
    }

    /// Cancel the pending entry of a sample (history eviction).
    ///
    /// Entries already merged into the drain-ready list are dropped when the
    /// worker reaches them; their delivery finds nothing left to send.
    pub fn remove_change(&self, id: &SampleId) {
        if self.shared.queued.remove(id).is_none() {
            return;
        }
        let removed = {
            let mut incoming = self.shared.incoming.lock();
            let before = incoming.new_samples.len() + incoming.resends.len();
            incoming.new_samples.retain(|t| t.id != *id);
            incoming.resends.retain(|t| t.id != *id);
            before - incoming.new_samples.len() - incoming.resends.len()
        };
        if removed > 0 {
            self.shared.release_writer_pending(&id.writer, removed);
        }
    }

    /// Entries currently queued across all writers.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Entries currently queued for `writer`.
    pub fn writer_pending(&self, writer: &Guid) -> usize {
        self.shared.writer_pending(writer)
    }

    /// True if `id` has a pending entry.
    pub fn is_queued(&self, id: &SampleId) -> bool {
        self.shared.queued.contains_key(id)
    }

    /// Wake the worker (e.g. after a writer became deliverable again).
    pub fn trigger(&self) {
        self.shared.wake.notify();
    }

    pub fn metrics(&self) -> FlowMetricsSnapshot {
        let m = &self.shared.metrics;
        FlowMetricsSnapshot {
            submitted_new: m.submitted_new.load(Ordering::Relaxed),
            submitted_resend: m.submitted_resend.load(Ordering::Relaxed),
            coalesced: m.coalesced.load(Ordering::Relaxed),
            delivered_inline: m.delivered_inline.load(Ordering::Relaxed),
            delivered_queued: m.delivered_queued.load(Ordering::Relaxed),
            fallback_enqueued: m.fallback_enqueued.load(Ordering::Relaxed),
            delivery_failures: m.delivery_failures.load(Ordering::Relaxed),
            budget_deferrals: m.budget_deferrals.load(Ordering::Relaxed),
            discarded: m.discarded.load(Ordering::Relaxed),
            bytes_sent: m.bytes_sent.load(Ordering::Relaxed),
            pending: self.pending_count(),
        }
    }

    /// Stop the worker and wait for it to exit.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify();
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("[flow] worker of '{}' panicked", self.shared.config.name);
            }
        }
    }
}

impl Drop for FlowController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowController")
            .field("name", &self.shared.config.name)
            .field("publish_mode", &self.shared.config.publish_mode)
            .field("scheduling", &self.shared.config.scheduling)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl FlowShared {
    fn writer_pending(&self, writer: &Guid) -> usize {
        self.clients
            .read()
            .get(writer)
            .map(|slot| slot.pending.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn account_inline(&self, result: DeliveryResult) {
        self.metrics
            .bytes_sent
            .fetch_add(result.bytes() as u64, Ordering::Relaxed);
        if result.is_delivered() {
            self.metrics.delivered_inline.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.delivery_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn enqueue(&self, id: SampleId, kind: SubmitKind) {
        if self.queued.insert(id, ()).is_some() {
            // Already pending: the queued entry serves every reader that
            // needs the sample when it is delivered.
            self.metrics.coalesced.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let slot = self.clients.read().get(&id.writer).cloned();
        let Some(slot) = slot else {
            self.queued.remove(&id);
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        };
        slot.pending.fetch_add(1, Ordering::AcqRel);
        self.pending.fetch_add(1, Ordering::AcqRel);

        let entry = Ticketed {
            ticket: self.next_ticket.fetch_add(1, Ordering::Relaxed),
            id,
        };
        {
            let mut incoming = self.incoming.lock();
            match kind {
                SubmitKind::New => incoming.new_samples.push_back(entry),
                SubmitKind::Resend => incoming.resends.push_back(entry),
            }
        }
        self.wake.notify();
    }

    fn release_writer_pending(&self, writer: &Guid, count: usize) {
        if let Some(slot) = self.clients.read().get(writer) {
            let _ = slot
                .pending
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                    Some(p.saturating_sub(count))
                });
        }
        self.release_pending(count);
    }

    fn release_pending(&self, count: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                Some(p.saturating_sub(count))
            });
    }

    fn run(self: Arc<Self>) {
        log::debug!("[flow] worker '{}' started", self.config.name);
        while !self.stop.load(Ordering::Acquire) {
            let deadline = self.drain_pass();
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            self.wake.wait_until(deadline);
        }
        log::debug!("[flow] worker '{}' stopped", self.config.name);
    }

    /// Merge incoming entries, then drain until empty, blocked or out of budget.
    ///
    /// Returns the instant at which the worker must wake on its own.
    fn drain_pass(&self) -> Option<Instant> {
        let batch = std::mem::take(&mut *self.incoming.lock());

        let mut ready = self.ready.lock();
        self.merge(&mut ready, batch);

        let now = Instant::now();
        if ready.budget.refresh(now) {
            ready.scheduler.on_period_reset();
        }

        loop {
            if self.stop.load(Ordering::Acquire) {
                return None;
            }
            let Some(id) = ready.scheduler.select(&ready.queues, &ready.budget) else {
                return None;
            };

            if ready.budget.is_exhausted() {
                self.metrics.budget_deferrals.fetch_add(1, Ordering::Relaxed);
                return Some(ready.budget.next_reset());
            }
            let budget = ready.budget.available();

            let client = self
                .clients
                .read()
                .get(&id.writer)
                .and_then(|slot| slot.client.upgrade());
            let Some(client) = client else {
                ready.queues.remove(&id);
                self.queued.remove(&id);
                self.release_pending(1);
                self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            // Claim the entry: submissions from now on create a new one
            self.queued.remove(&id);
            let result = client.deliver_queued(id.seq, budget);
            let bucket = ready.queues.bucket_of(&id);
            ready.budget.consume(result.bytes());
            self.metrics
                .bytes_sent
                .fetch_add(result.bytes() as u64, Ordering::Relaxed);

            match result {
                DeliveryResult::Delivered { bytes } => {
                    ready.queues.remove(&id);
                    if let Some(bucket) = bucket {
                        ready.scheduler.on_delivered(bucket, bytes);
                    }
                    self.release_writer_pending(&id.writer, 1);
                    self.metrics.delivered_queued.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryResult::ExceededLimit { .. } if budget.is_some() => {
                    self.queued.insert(id, ());
                    self.metrics.budget_deferrals.fetch_add(1, Ordering::Relaxed);
                    log::trace!(
                        "[flow] '{}' budget exhausted at {}#{}",
                        self.config.name,
                        id.writer,
                        id.seq
                    );
                    return Some(ready.budget.next_reset());
                }
                DeliveryResult::ExceededLimit { .. } | DeliveryResult::NotDelivered { .. } => {
                    self.queued.insert(id, ());
                    self.metrics.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    log::trace!(
                        "[flow] '{}' delivery of {}#{} failed, retry in {:?}",
                        self.config.name,
                        id.writer,
                        id.seq,
                        self.config.retry_interval
                    );
                    return Some(Instant::now() + self.config.retry_interval);
                }
            }
        }
    }

    /// Move incoming entries into their buckets in submission order.
    fn merge(&self, ready: &mut Ready, mut batch: Incoming) {
        loop {
            let take_new = match (batch.new_samples.front(), batch.resends.front()) {
                (Some(n), Some(r)) => n.ticket < r.ticket,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_new {
                batch.new_samples.pop_front()
            } else {
                batch.resends.pop_front()
            };
            let Some(entry) = next else { break };

            let bucket = ready.scheduler.bucket_for(&entry.id.writer);
            if !ready.queues.push_back(bucket, entry.id, entry.ticket) {
                // An entry for this sample is already waiting in the ready list
                self.release_writer_pending(&entry.id.writer, 1);
            }
        }
    }
}
