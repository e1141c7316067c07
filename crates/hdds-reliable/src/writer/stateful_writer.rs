// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable stateful writer (RTPS StatefulWriter, DDS-RTPS v2.5 Sec.8.4.9).
//!
//! Owns the history, one `ReaderProxy` per matched reader, and drives the
//! ACKNACK / HEARTBEAT / NACKFRAG protocol. Sends go through a
//! `FlowController`; HEARTBEATs bypass it.
//!
//! # Locking
//!
//! All reader proxies and the history sit behind one writer-wide
//! `parking_lot::Mutex`. Timer callbacks and flow controller deliveries run
//! on their own threads and take that lock themselves; nothing calls back
//! into the writer while holding it, so it is not re-entrant. Listener
//! callbacks run after the lock is released.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::builder::ReliableWriterBuilder;
use super::heartbeat::HeartbeatTx;
use super::listener::WriterListener;
use super::reader_proxy::{ChangeForReaderStatus, ReaderProxy, ReaderSnapshot};
use super::timers::{TimerHandle, TimerHandler, TimerKey, TimerThread};
use crate::config::{HistoryKind, ReaderQos, WriterConfig};
use crate::error::{Error, Result};
use crate::flow::{ByteBudget, FlowController};
use crate::reliability::{
    AckNackMsg, NackFragMsg, ReliableMetrics, ReliableMetricsSnapshot, Submessage, WriterHistory,
};
use crate::transport::Transport;
use crate::types::{CacheChange, ChangeKind, Guid, SampleId, SequenceNumber};

/// How `remove_change` treats a sample some reader has not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Refuse with `Error::NotAcknowledged`.
    IfAcknowledged,
    /// Block until acknowledged by all (`None` = no timeout).
    WaitAcknowledged(Option<Duration>),
    /// Drop regardless of acknowledgement.
    Force,
}

/// State guarded by the writer-wide lock.
pub(super) struct WriterState {
    pub(super) history: Box<dyn WriterHistory>,
    pub(super) proxies: BTreeMap<Guid, ReaderProxy>,
    pub(super) last_seq: SequenceNumber,
    /// Set after a fatal invariant violation
    pub(super) failed: bool,
    /// Highest sequence already reported as acknowledged by all
    pub(super) acked_by_all: SequenceNumber,
    pub(super) heartbeat: HeartbeatTx,
}

/// Listener events collected under the lock.
#[derive(Default)]
pub(super) struct Notifications {
    matched: Option<(Guid, ReaderQos)>,
    unmatched: Option<Guid>,
    removed: Vec<(SequenceNumber, bool)>,
    acked: Vec<SequenceNumber>,
}

/// Writer internals shared with the timer thread and the flow controller.
pub(crate) struct WriterShared {
    pub(super) guid: Guid,
    pub(super) config: WriterConfig,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) flow: Arc<FlowController>,
    pub(super) state: Mutex<WriterState>,
    /// Signalled whenever acknowledgement state changes
    pub(super) acked: Condvar,
    pub(super) metrics: ReliableMetrics,
    pub(super) listener: Option<Arc<dyn WriterListener>>,
    pub(super) timers: TimerHandle,
}

/// Reliable writer.
///
/// All methods take `&self` and may be called concurrently from application
/// threads and the network receive thread.
pub struct ReliableWriter {
    pub(super) shared: Arc<WriterShared>,
    pub(super) timers: TimerThread,
}

impl ReliableWriter {
    /// Start building a writer with identity `guid`.
    pub fn builder(guid: Guid) -> ReliableWriterBuilder {
        ReliableWriterBuilder::new(guid)
    }

    pub fn guid(&self) -> Guid {
        self.shared.guid
    }

    pub fn config(&self) -> &WriterConfig {
        &self.shared.config
    }

    pub fn flow_controller(&self) -> &Arc<FlowController> {
        &self.shared.flow
    }

    /// Publish a new sample; returns its sequence number (first is 1).
    ///
    /// With KEEP_ALL history this blocks up to `max_blocking_time` when the
    /// history is full and its oldest sample is not acknowledged by all.
    pub fn write(&self, kind: ChangeKind, payload: impl Into<Arc<[u8]>>) -> Result<SequenceNumber> {
        let payload = payload.into();
        let mut notes = Notifications::default();
        let result = {
            let mut state = self.shared.state.lock();
            self.shared.ensure_alive(&state).and_then(|()| {
                self.shared.make_room(&mut state, &mut notes)?;
                let seq = state.last_seq + 1;
                let change = CacheChange::new(self.shared.guid, seq, kind, payload);
                self.shared.insert_change(&mut state, change, &mut notes)?;
                Ok(seq)
            })
        };
        self.shared.dispatch(notes);
        result
    }

    /// Publish an externally built sample.
    ///
    /// Its sequence number must be strictly greater than every previous one;
    /// a violation aborts the writer (later calls return `WriterFailed`).
    pub fn on_write(&self, change: CacheChange) -> Result<()> {
        if change.writer_guid != self.shared.guid {
            return Err(Error::ForeignSample(change.writer_guid));
        }
        let mut notes = Notifications::default();
        let result = {
            let mut state = self.shared.state.lock();
            self.shared.ensure_alive(&state).and_then(|()| {
                self.shared.make_room(&mut state, &mut notes)?;
                self.shared.insert_change(&mut state, change, &mut notes)
            })
        };
        self.shared.dispatch(notes);
        result
    }

    /// Match a remote reader.
    ///
    /// Every sample in history gets a record (relevant only when both sides
    /// keep history for late joiners) and the reader receives one HEARTBEAT.
    pub fn match_reader(&self, reader: Guid, qos: ReaderQos) -> Result<()> {
        self.shared.match_reader(reader, qos)
    }

    /// Unmatch a reader and drop its state.
    pub fn unmatch_reader(&self, reader: Guid) -> Result<()> {
        self.shared.unmatch_reader(reader)
    }

    /// Process an inbound ACKNACK.
    pub fn on_acknack(&self, msg: &AckNackMsg) {
        self.shared.on_acknack(msg);
    }

    /// Process an inbound NACKFRAG.
    pub fn on_nackfrag(&self, msg: &NackFragMsg) {
        self.shared.on_nackfrag(msg);
    }

    /// Submit every UNSENT sample of push-mode readers to the flow controller.
    pub fn flush_unsent(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_alive(&state)?;
        self.shared.flush_unsent_locked(&mut state)
    }

    /// Heartbeat to all reliable readers if any of them still has
    /// outstanding records. Returns `true` if one was sent.
    pub fn emit_periodic_heartbeat(&self) -> bool {
        self.shared.emit_periodic_heartbeat()
    }

    /// Remove a sample from history.
    pub fn remove_change(&self, seq: SequenceNumber, policy: RemovalPolicy) -> Result<()> {
        self.shared.remove_change(seq, policy)
    }

    /// Block until every matched reliable reader acknowledged `seq`.
    pub fn wait_for_acknowledgement(
        &self,
        seq: SequenceNumber,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        if seq == 0 || seq > state.last_seq {
            return Err(Error::UnknownSequence(seq));
        }
        let shared = &self.shared;
        shared.wait_locked(&mut state, timeout, |s| shared.all_acknowledged(s, seq))
    }

    /// Block until every sample written so far is acknowledged by all.
    pub fn wait_for_all_acknowledged(&self, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.shared.state.lock();
        let target = state.last_seq;
        let shared = &self.shared;
        shared.wait_locked(&mut state, timeout, |s| shared.all_acked_through(s, target))
    }

    /// True if every matched reliable reader acknowledged `seq`.
    pub fn is_acked_by_all(&self, seq: SequenceNumber) -> bool {
        let state = self.shared.state.lock();
        self.shared.all_acknowledged(&state, seq)
    }

    pub fn matched_readers(&self) -> Vec<Guid> {
        self.shared.state.lock().proxies.keys().copied().collect()
    }

    pub fn reader_snapshot(&self, reader: Guid) -> Option<ReaderSnapshot> {
        self.shared
            .state
            .lock()
            .proxies
            .get(&reader)
            .map(ReaderProxy::snapshot)
    }

    /// Highest sequence number written.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.shared.state.lock().last_seq
    }

    pub fn history_len(&self) -> usize {
        self.shared.state.lock().history.len()
    }

    /// True once a fatal invariant violation aborted the writer.
    pub fn is_failed(&self) -> bool {
        self.shared.state.lock().failed
    }

    pub fn metrics(&self) -> ReliableMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for ReliableWriter {
    fn drop(&mut self) {
        self.timers.stop();
        self.shared.flow.unregister_writer(&self.shared.guid);
        log::debug!("[writer] {} dropped", self.shared.guid);
    }
}

impl fmt::Debug for ReliableWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliableWriter")
            .field("guid", &self.shared.guid)
            .field("flow_controller", &self.shared.flow.name())
            .finish_non_exhaustive()
    }
}

impl WriterShared {
    pub(super) fn ensure_alive(&self, state: &WriterState) -> Result<()> {
        if state.failed {
            Err(Error::WriterFailed)
        } else {
            Ok(())
        }
    }

    fn abort(&self, state: &mut WriterState, reason: &Error) {
        log::error!("[writer] {} aborted: {}", self.guid, reason);
        state.failed = true;
        self.acked.notify_all();
    }

    // ------------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------------

    /// Free one history slot if the history is full.
    fn make_room(
        &self,
        state: &mut MutexGuard<'_, WriterState>,
        notes: &mut Notifications,
    ) -> Result<()> {
        if !state.history.is_full() {
            return Ok(());
        }
        match state.history.kind() {
            HistoryKind::KeepLast(_) => {
                if let Some(oldest) = state.history.min_seq() {
                    let acknowledged = self.all_acknowledged(state, oldest);
                    self.on_history_eviction(state, oldest, acknowledged, notes);
                }
                Ok(())
            }
            HistoryKind::KeepAll => {
                let deadline = Instant::now() + self.config.max_blocking_time;
                loop {
                    self.ensure_alive(state)?;
                    if !state.history.is_full() {
                        return Ok(());
                    }
                    let Some(oldest) = state.history.min_seq() else {
                        return Ok(());
                    };
                    if self.all_acknowledged(state, oldest) {
                        self.on_history_eviction(state, oldest, true, notes);
                        return Ok(());
                    }
                    if self.acked.wait_until(state, deadline).timed_out()
                        && !self.all_acknowledged(state, oldest)
                    {
                        log::debug!(
                            "[writer] {} history full, sample {} still unacknowledged",
                            self.guid,
                            oldest
                        );
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    /// Store `change` and create one record per matched reader.
    fn insert_change(
        &self,
        state: &mut WriterState,
        change: CacheChange,
        notes: &mut Notifications,
    ) -> Result<()> {
        let seq = change.sequence_number;
        if seq <= state.last_seq {
            let err = Error::OutOfOrderSequence {
                last: state.last_seq,
                got: seq,
            };
            self.abort(state, &err);
            return Err(err);
        }

        let change = Arc::new(change);
        state.history.insert(Arc::clone(&change))?;

        let skipped = state.last_seq + 1..seq;
        state.last_seq = seq;

        let fragments = change.fragment_count(self.config.fragment_size);
        let mut needs_send = false;
        let mut violation = None;
        for proxy in state.proxies.values_mut() {
            // Skipped sequence numbers will never exist: GAP them on request
            if let Err(err) = add_holes(proxy, skipped.clone()) {
                violation = Some(err);
                break;
            }
            let status = if !proxy.is_reliable() || proxy.push_mode() {
                ChangeForReaderStatus::Unsent
            } else {
                ChangeForReaderStatus::Unacknowledged
            };
            if let Err(err) = proxy.add_record(seq, status, true, fragments) {
                violation = Some(err);
                break;
            }
            needs_send |= status == ChangeForReaderStatus::Unsent;
        }
        if let Some(err) = violation {
            self.abort(state, &err);
            return Err(err);
        }

        log::trace!(
            "[writer] {} wrote seq {} ({} bytes)",
            self.guid,
            seq,
            change.size()
        );

        let sent = if needs_send {
            self.submit_new_locked(state, seq)
        } else {
            Ok(())
        };
        self.update_acked_by_all(state, notes);
        self.observe_pending(state);
        sent
    }

    pub(super) fn submit_new_locked(
        &self,
        state: &mut WriterState,
        seq: SequenceNumber,
    ) -> Result<()> {
        let id = SampleId::new(self.guid, seq);
        let mut inline = |budget: Option<ByteBudget>| self.deliver_locked(state, seq, budget);
        self.flow.submit_new(id, &mut inline)
    }

    fn submit_resend_locked(&self, state: &mut WriterState, seq: SequenceNumber) {
        let id = SampleId::new(self.guid, seq);
        let mut inline = |budget: Option<ByteBudget>| self.deliver_locked(state, seq, budget);
        if let Err(err) = self.flow.submit_resend(id, &mut inline) {
            self.metrics.increment_send_failures();
            log::debug!("[writer] {} resend of {} failed: {}", self.guid, seq, err);
        }
    }

    fn flush_unsent_locked(&self, state: &mut WriterState) -> Result<()> {
        let seqs: BTreeSet<SequenceNumber> = state
            .proxies
            .values()
            .filter(|p| p.push_mode() || !p.is_reliable())
            .flat_map(ReaderProxy::unsent_sequences)
            .collect();

        let mut first_err = None;
        for seq in seqs {
            if let Err(err) = self.submit_new_locked(state, seq) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // ------------------------------------------------------------------------
    // History eviction
    // ------------------------------------------------------------------------

    /// Remove `seq` from history and invalidate every record referencing it.
    fn on_history_eviction(
        &self,
        state: &mut WriterState,
        seq: SequenceNumber,
        acknowledged: bool,
        notes: &mut Notifications,
    ) -> bool {
        if state.history.remove(seq).is_none() {
            return false;
        }
        for proxy in state.proxies.values_mut() {
            proxy.invalidate(seq);
        }
        self.flow.remove_change(&SampleId::new(self.guid, seq));
        if !acknowledged {
            log::debug!(
                "[writer] {} dropped sample {} before full acknowledgement",
                self.guid,
                seq
            );
        }
        notes.removed.push((seq, acknowledged));
        self.acked.notify_all();
        true
    }

    fn remove_change(&self, seq: SequenceNumber, policy: RemovalPolicy) -> Result<()> {
        let mut notes = Notifications::default();
        let result = {
            let mut state = self.state.lock();
            let result = self.remove_change_locked(&mut state, seq, policy, &mut notes);
            self.update_acked_by_all(&mut state, &mut notes);
            result
        };
        self.dispatch(notes);
        result
    }

    fn remove_change_locked(
        &self,
        state: &mut MutexGuard<'_, WriterState>,
        seq: SequenceNumber,
        policy: RemovalPolicy,
        notes: &mut Notifications,
    ) -> Result<()> {
        if state.history.get(seq).is_none() {
            return Err(Error::UnknownSequence(seq));
        }
        match policy {
            RemovalPolicy::Force => {
                let acknowledged = self.all_acknowledged(state, seq);
                self.on_history_eviction(state, seq, acknowledged, notes);
                Ok(())
            }
            RemovalPolicy::IfAcknowledged => {
                if !self.all_acknowledged(state, seq) {
                    return Err(Error::NotAcknowledged(seq));
                }
                self.on_history_eviction(state, seq, true, notes);
                Ok(())
            }
            RemovalPolicy::WaitAcknowledged(timeout) => {
                self.wait_locked(state, timeout, |s| self.all_acknowledged(s, seq))?;
                // Another thread may have removed it while we waited
                self.on_history_eviction(state, seq, true, notes);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reader lifecycle
    // ------------------------------------------------------------------------

    fn match_reader(&self, reader: Guid, qos: ReaderQos) -> Result<()> {
        if reader.is_unknown() || !reader.is_reader() {
            return Err(Error::InvalidReader(reader));
        }

        let mut notes = Notifications::default();
        {
            let mut state = self.state.lock();
            self.ensure_alive(&state)?;
            if state.proxies.contains_key(&reader) {
                return Err(Error::AlreadyMatched(reader));
            }

            let reliable = qos.is_reliable() && self.config.is_reliable();
            let replay = reliable
                && self.config.durability.replays_history()
                && qos.durability.replays_history();
            let start = state
                .history
                .min_seq()
                .map_or(state.last_seq, |first| first - 1);

            let mut proxy =
                ReaderProxy::new(reader, qos, reliable, self.config.push_mode).with_low_water_mark(start);
            let stored: BTreeSet<SequenceNumber> =
                state.history.sequence_numbers().into_iter().collect();
            for seq in start + 1..=state.last_seq {
                if !stored.contains(&seq) {
                    // Removed or never written
                    add_holes(&mut proxy, seq..seq + 1)?;
                    continue;
                }
                let added = if reliable {
                    let fragments = if replay {
                        state
                            .history
                            .get(seq)
                            .map_or(0, |c| c.fragment_count(self.config.fragment_size))
                    } else {
                        0
                    };
                    proxy.add_record(seq, ChangeForReaderStatus::Unacknowledged, replay, fragments)
                } else {
                    proxy.add_record(seq, ChangeForReaderStatus::Acknowledged, false, 0)
                };
                added?;
            }

            log::debug!(
                "[writer] {} matched reader {} (reliable={}, replay={}, {} records)",
                self.guid,
                reader,
                reliable,
                replay,
                proxy.pending_records()
            );
            state.proxies.insert(reader, proxy);

            if reliable {
                self.send_heartbeat_locked(&mut state, Some(reader), false);
            }
            self.observe_pending(&state);
            notes.matched = Some((reader, qos));
        }
        self.dispatch(notes);
        Ok(())
    }

    fn unmatch_reader(&self, reader: Guid) -> Result<()> {
        let mut notes = Notifications::default();
        {
            let mut state = self.state.lock();
            let Some(proxy) = state.proxies.remove(&reader) else {
                return Err(Error::ReaderNotMatched(reader));
            };
            self.timers.cancel(TimerKey::NackResponse(reader));
            self.timers.cancel(TimerKey::NackSuppression(reader));

            // Entries nobody else is waiting for are cancelled
            for seq in proxy.unsent_sequences() {
                let still_needed = state.proxies.values().any(|p| {
                    p.record(seq)
                        .is_some_and(|r| r.status() == ChangeForReaderStatus::Unsent)
                });
                if !still_needed {
                    self.flow.remove_change(&SampleId::new(self.guid, seq));
                }
            }

            log::debug!(
                "[writer] {} unmatched reader {} ({} records dropped)",
                self.guid,
                reader,
                proxy.pending_records()
            );
            self.update_acked_by_all(&mut state, &mut notes);
            self.acked.notify_all();
            notes.unmatched = Some(reader);
        }
        self.dispatch(notes);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound control messages
    // ------------------------------------------------------------------------

    fn on_acknack(&self, msg: &AckNackMsg) {
        let mut notes = Notifications::default();
        {
            let mut state = self.state.lock();
            if state.failed {
                return;
            }
            if !msg.writer_guid.is_unknown() && msg.writer_guid != self.guid {
                log::warn!(
                    "[writer] {} ACKNACK addressed to {}, ignored",
                    self.guid,
                    msg.writer_guid
                );
                return;
            }

            let fragment_size = self.config.fragment_size;
            let WriterState {
                proxies, history, ..
            } = &mut *state;
            let Some(proxy) = proxies.get_mut(&msg.reader_guid) else {
                log::warn!(
                    "[writer] {} ACKNACK from unknown reader {}",
                    self.guid,
                    msg.reader_guid
                );
                self.metrics.increment_acknacks_ignored();
                return;
            };
            if !proxy.is_reliable() || !proxy.check_acknack_count(msg.count) {
                log::trace!(
                    "[writer] {} stale ACKNACK count {} from {}",
                    self.guid,
                    msg.count,
                    msg.reader_guid
                );
                self.metrics.increment_acknacks_ignored();
                return;
            }
            self.metrics.increment_acknacks_received();

            let set = &msg.reader_sn_state;
            proxy.acknowledge_before(set.base(), &**history, fragment_size);

            let requested: Vec<SequenceNumber> = set.iter().collect();
            let mut answer_heartbeat = false;
            let mut nacked = false;
            if requested.is_empty() {
                answer_heartbeat = !msg.final_flag;
            } else {
                proxy.acknowledge_unset(set);
                nacked = proxy.mark_requested(requested.iter().copied());
                if nacked {
                    self.metrics.add_nacked_sequences(requested.len() as u64);
                } else {
                    // Nothing we track: tell the reader what is available
                    answer_heartbeat = true;
                }
            }

            if nacked {
                self.schedule_nack_response(&mut state, msg.reader_guid, false);
            }
            if answer_heartbeat {
                self.send_heartbeat_locked(&mut state, Some(msg.reader_guid), false);
            }

            self.update_acked_by_all(&mut state, &mut notes);
            self.observe_pending(&state);
            self.acked.notify_all();
        }
        self.dispatch(notes);
    }

    fn on_nackfrag(&self, msg: &NackFragMsg) {
        let mut state = self.state.lock();
        if state.failed {
            return;
        }
        let Some(proxy) = state.proxies.get_mut(&msg.reader_guid) else {
            log::warn!(
                "[writer] {} NACKFRAG from unknown reader {}",
                self.guid,
                msg.reader_guid
            );
            return;
        };
        if !proxy.is_reliable() || !proxy.check_nackfrag_count(msg.count) {
            return;
        }
        self.metrics.increment_nackfrags_received();
        if proxy.mark_fragment_requested(msg.writer_sn, &msg.fragment_number_state) {
            self.schedule_nack_response(&mut state, msg.reader_guid, true);
        }
    }

    /// Arm the nack-response timer of `reader` (or respond now for a zero delay).
    fn schedule_nack_response(&self, state: &mut WriterState, reader: Guid, restart: bool) {
        let delay = self.config.nack_response_delay;
        if delay.is_zero() {
            self.on_nack_response_locked(state, reader);
            return;
        }
        let Some(proxy) = state.proxies.get_mut(&reader) else {
            return;
        };
        if proxy.nack_response_armed && !restart {
            // Burst of NACKs: one bounded-delay response
            return;
        }
        proxy.nack_response_armed = true;
        self.timers
            .arm(TimerKey::NackResponse(reader), Instant::now() + delay);
    }

    /// REQUESTED -> UNSENT for `reader`, resubmitting each sample.
    fn on_nack_response_locked(&self, state: &mut WriterState, reader: Guid) {
        let Some(proxy) = state.proxies.get_mut(&reader) else {
            return;
        };
        proxy.nack_response_armed = false;
        let seqs = proxy.bulk_transition(
            ChangeForReaderStatus::Requested,
            ChangeForReaderStatus::Unsent,
        );
        if seqs.is_empty() {
            return;
        }
        log::trace!(
            "[writer] {} resending {} samples to {}",
            self.guid,
            seqs.len(),
            reader
        );
        for seq in seqs {
            self.submit_resend_locked(state, seq);
        }
    }

    fn on_nack_suppression_locked(&self, state: &mut WriterState, reader: Guid) -> Option<Instant> {
        let suppression = self.config.nack_suppression_duration;
        let proxy = state.proxies.get_mut(&reader)?;
        let (expired, next) = proxy.expire_underway(Instant::now(), suppression);
        proxy.nack_suppression_armed = next.is_some();
        if expired > 0 {
            log::trace!(
                "[writer] {} {} samples for {} open to NACKs again",
                self.guid,
                expired,
                reader
            );
        }
        next
    }

    // ------------------------------------------------------------------------
    // Heartbeats
    // ------------------------------------------------------------------------

    fn emit_periodic_heartbeat(&self) -> bool {
        let mut state = self.state.lock();
        if state.failed {
            return false;
        }
        let outstanding = state
            .proxies
            .values()
            .any(|p| p.is_reliable() && p.has_unacknowledged());
        if !outstanding {
            return false;
        }
        self.send_heartbeat_locked(&mut state, None, false)
    }

    /// HEARTBEAT with the current `[first, last]` range, to `reader` or to
    /// every reliable reader.
    fn send_heartbeat_locked(
        &self,
        state: &mut WriterState,
        reader: Option<Guid>,
        final_flag: bool,
    ) -> bool {
        let destinations: Vec<Guid> = match reader {
            Some(guid) => vec![guid],
            None => state
                .proxies
                .values()
                .filter(|p| p.is_reliable())
                .map(ReaderProxy::guid)
                .collect(),
        };
        if destinations.is_empty() {
            return false;
        }

        let last = state.last_seq;
        let first = state.history.min_seq().unwrap_or(last + 1);
        let hb = state.heartbeat.build(
            self.guid,
            reader.unwrap_or_else(Guid::unknown),
            first,
            last,
            final_flag,
        );
        match self.transport.send(&Submessage::Heartbeat(hb), &destinations) {
            Ok(()) => {
                self.metrics.increment_heartbeats_sent();
                log::trace!(
                    "[writer] {} HEARTBEAT #{} [{}, {}] to {} readers",
                    self.guid,
                    hb.count,
                    first,
                    last,
                    destinations.len()
                );
                true
            }
            Err(err) => {
                self.metrics.increment_send_failures();
                log::debug!("[writer] {} HEARTBEAT send failed: {}", self.guid, err);
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Acknowledgement bookkeeping
    // ------------------------------------------------------------------------

    /// Every reliable reader acknowledged `seq`.
    pub(super) fn all_acknowledged(&self, state: &WriterState, seq: SequenceNumber) -> bool {
        state
            .proxies
            .values()
            .filter(|p| p.is_reliable())
            .all(|p| p.is_acknowledged(seq) || p.acked_through() >= seq)
    }

    /// Every reliable reader acknowledged everything up to `seq`.
    fn all_acked_through(&self, state: &WriterState, seq: SequenceNumber) -> bool {
        state
            .proxies
            .values()
            .filter(|p| p.is_reliable())
            .all(|p| p.acked_through() >= seq)
    }

    /// Advance the acknowledged-by-all watermark, queueing one notification
    /// per newly covered sample.
    fn update_acked_by_all(&self, state: &mut WriterState, notes: &mut Notifications) {
        let watermark = state
            .proxies
            .values()
            .filter(|p| p.is_reliable())
            .map(ReaderProxy::acked_through)
            .min()
            .unwrap_or(state.last_seq)
            .min(state.last_seq);
        if watermark <= state.acked_by_all {
            return;
        }
        if self.listener.is_some() {
            notes.acked.extend(state.acked_by_all + 1..=watermark);
        }
        self.metrics.add_acked_by_all(watermark - state.acked_by_all);
        state.acked_by_all = watermark;
        self.acked.notify_all();
    }

    fn observe_pending(&self, state: &WriterState) {
        let total = state.proxies.values().map(ReaderProxy::pending_records).sum();
        self.metrics.observe_pending_records(total);
    }

    /// Wait on the ack condition until `done` holds.
    fn wait_locked<F>(
        &self,
        state: &mut MutexGuard<'_, WriterState>,
        timeout: Option<Duration>,
        done: F,
    ) -> Result<()>
    where
        F: Fn(&WriterState) -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.ensure_alive(state)?;
            if done(state) {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.acked.wait_until(state, deadline).timed_out() {
                        return if done(state) { Ok(()) } else { Err(Error::Timeout) };
                    }
                }
                None => self.acked.wait(state),
            }
        }
    }

    pub(super) fn dispatch(&self, notes: Notifications) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        if let Some((reader, qos)) = notes.matched {
            listener.on_reader_matched(reader, qos);
        }
        if let Some(reader) = notes.unmatched {
            listener.on_reader_unmatched(reader);
        }
        for (seq, acknowledged) in notes.removed {
            listener.on_sample_removed(seq, acknowledged);
        }
        for seq in notes.acked {
            listener.on_acknowledged_by_all(seq);
        }
    }
}

impl TimerHandler for WriterShared {
    fn on_timer(&self, key: TimerKey) -> Option<Instant> {
        match key {
            TimerKey::Heartbeat => {
                self.emit_periodic_heartbeat();
                let period = self.config.heartbeat_period;
                (!period.is_zero()).then(|| Instant::now() + period)
            }
            TimerKey::NackResponse(reader) => {
                let mut state = self.state.lock();
                self.on_nack_response_locked(&mut state, reader);
                None
            }
            TimerKey::NackSuppression(reader) => {
                let mut state = self.state.lock();
                self.on_nack_suppression_locked(&mut state, reader)
            }
        }
    }
}

/// Track sequence numbers with no sample behind them as irrelevant.
///
/// A reliable reader keeps an UNACKNOWLEDGED record so a NACK for it is
/// answered with a GAP; best-effort readers take the fast path.
fn add_holes(
    proxy: &mut ReaderProxy,
    seqs: std::ops::Range<SequenceNumber>,
) -> Result<()> {
    let status = if proxy.is_reliable() {
        ChangeForReaderStatus::Unacknowledged
    } else {
        ChangeForReaderStatus::Acknowledged
    };
    for seq in seqs {
        proxy.add_record(seq, status, false, 0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct AckCounter {
        last: AtomicU64,
        calls: AtomicU64,
    }

    impl WriterListener for AckCounter {
        fn on_acknowledged_by_all(&self, seq: SequenceNumber) {
            self.last.store(seq, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn writer_with(listener: Arc<AckCounter>) -> ReliableWriter {
        let (transport, _rx) = ChannelTransport::unbounded();
        ReliableWriter::builder(Guid::new([1; 12], [0, 0, 1, 0x02]))
            .config(WriterConfig {
                heartbeat_period: Duration::ZERO,
                ..WriterConfig::default()
            })
            .transport(Arc::new(transport))
            .listener(listener)
            .build()
            .expect("writer")
    }

    #[test]
    fn test_no_reliable_reader_means_acknowledged() {
        let listener = Arc::new(AckCounter::default());
        let writer = writer_with(Arc::clone(&listener));
        for _ in 0..3 {
            writer.write(ChangeKind::Alive, vec![0u8; 4]).expect("write");
        }
        assert!(writer.is_acked_by_all(3));
        assert_eq!(listener.last.load(Ordering::SeqCst), 3);
        assert_eq!(listener.calls.load(Ordering::SeqCst), 3);
        writer
            .wait_for_acknowledgement(3, Some(Duration::from_millis(1)))
            .expect("acknowledged");
    }

    #[test]
    fn test_sequence_numbers_start_at_one() {
        let writer = writer_with(Arc::new(AckCounter::default()));
        assert_eq!(writer.last_sequence(), 0);
        assert_eq!(writer.write(ChangeKind::Alive, vec![1u8]).expect("write"), 1);
        assert_eq!(writer.write(ChangeKind::Disposed, vec![2u8]).expect("write"), 2);
        assert_eq!(writer.history_len(), 2);
    }

    #[test]
    fn test_removal_policies_on_unknown_sequence() {
        let writer = writer_with(Arc::new(AckCounter::default()));
        for policy in [
            RemovalPolicy::IfAcknowledged,
            RemovalPolicy::Force,
            RemovalPolicy::WaitAcknowledged(None),
        ] {
            assert!(matches!(
                writer.remove_change(7, policy),
                Err(Error::UnknownSequence(7))
            ));
        }
    }
}
