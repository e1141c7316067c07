// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery of one sample to every reader that still needs it.
//!
//! Called by the flow controller, either inline on the writing thread
//! (synchronous modes, writer lock already held) or from its worker through
//! `FlowControllerClient::deliver_queued`.
//!
//! For a sample `seq`, readers whose record is UNSENT receive:
//! - DATA (or the missing DATA_FRAGs) when the record is relevant,
//! - a GAP covering all their unsent irrelevant records (reliable readers),
//! - nothing for irrelevant best-effort records, which are just acknowledged.
//!
//! Readers with identical needs share one multi-destination send.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::reader_proxy::ChangeForReaderStatus;
use super::stateful_writer::{WriterShared, WriterState};
use super::timers::TimerKey;
use crate::flow::{ByteBudget, DeliveryResult, FlowControllerClient};
use crate::reliability::{DataFragMsg, DataMsg, GapMsg, Submessage};
use crate::types::{Guid, SequenceNumber};

/// How long a queued delivery waits for the writer lock before retrying.
const LOCK_WAIT: Duration = Duration::from_millis(5);

impl WriterShared {
    pub(super) fn deliver_locked(
        &self,
        state: &mut WriterState,
        seq: SequenceNumber,
        mut budget: Option<ByteBudget>,
    ) -> DeliveryResult {
        let change = state.history.get(seq);

        let mut data_dests = Vec::new();
        let mut gap_dests = Vec::new();
        let mut dropped = Vec::new();
        for proxy in state.proxies.values() {
            let Some(record) = proxy.record(seq) else {
                continue;
            };
            if record.status() != ChangeForReaderStatus::Unsent {
                continue;
            }
            if record.is_relevant() && change.is_some() {
                data_dests.push(proxy.guid());
            } else if proxy.is_reliable() {
                gap_dests.push(proxy.guid());
            } else {
                dropped.push(proxy.guid());
            }
        }
        for reader in dropped {
            if let Some(proxy) = state.proxies.get_mut(&reader) {
                proxy.set_status(seq, ChangeForReaderStatus::Acknowledged);
            }
        }

        let mut bytes = 0;

        if !gap_dests.is_empty() && !self.send_gaps(state, seq, &gap_dests) {
            return DeliveryResult::NotDelivered { bytes };
        }

        let Some(change) = change else {
            return DeliveryResult::Delivered { bytes };
        };
        if data_dests.is_empty() {
            return DeliveryResult::Delivered { bytes };
        }

        let retransmit = data_dests.iter().any(|reader| {
            state
                .proxies
                .get(reader)
                .and_then(|p| p.record(seq))
                .is_some_and(|r| r.was_sent())
        });
        let fragment_size = self.config.fragment_size;
        let fragment_count = change.fragment_count(fragment_size);

        if fragment_count <= 1 {
            let size = change.size();
            if let Some(budget) = budget.as_ref() {
                if !budget.allows(size) {
                    return DeliveryResult::ExceededLimit { bytes };
                }
            }
            let msg = Submessage::Data(DataMsg {
                change: Arc::clone(&change),
            });
            if let Err(err) = self.transport.send(&msg, &data_dests) {
                self.metrics.increment_send_failures();
                log::trace!("[writer] {} DATA {} send failed: {}", self.guid, seq, err);
                return DeliveryResult::NotDelivered { bytes };
            }
            if let Some(budget) = budget.as_mut() {
                budget.consume(size);
            }
            bytes += size;
            self.metrics.increment_data_sent(retransmit);
            self.metrics.add_bytes_sent(size);
            for reader in data_dests {
                self.finalize_sent(state, reader, seq);
            }
            return DeliveryResult::Delivered { bytes };
        }

        for frag in 1..=fragment_count {
            let dests: Vec<Guid> = data_dests
                .iter()
                .copied()
                .filter(|reader| {
                    state
                        .proxies
                        .get(reader)
                        .and_then(|p| p.record(seq))
                        .is_some_and(|r| r.is_fragment_unsent(frag))
                })
                .collect();
            if dests.is_empty() {
                continue;
            }

            let msg = DataFragMsg {
                change: Arc::clone(&change),
                fragment_number: frag,
                fragment_size,
                fragment_count,
            };
            let len = msg.fragment_payload().len();
            if let Some(budget) = budget.as_ref() {
                if !budget.allows(len) {
                    return DeliveryResult::ExceededLimit { bytes };
                }
            }
            if let Err(err) = self.transport.send(&Submessage::DataFrag(msg), &dests) {
                self.metrics.increment_send_failures();
                log::trace!(
                    "[writer] {} DATA_FRAG {}/{} of {} send failed: {}",
                    self.guid,
                    frag,
                    fragment_count,
                    seq,
                    err
                );
                return DeliveryResult::NotDelivered { bytes };
            }
            if let Some(budget) = budget.as_mut() {
                budget.consume(len);
            }
            bytes += len;
            self.metrics.increment_data_frags_sent(retransmit);
            self.metrics.add_bytes_sent(len);

            for reader in dests {
                let complete = state
                    .proxies
                    .get_mut(&reader)
                    .is_some_and(|p| p.mark_fragment_sent(seq, frag));
                if complete {
                    self.finalize_sent(state, reader, seq);
                }
            }
        }

        // Records left UNSENT with nothing unsent (fragments flagged sent earlier)
        for reader in data_dests {
            let stuck = state
                .proxies
                .get(&reader)
                .and_then(|p| p.record(seq))
                .is_some_and(|r| {
                    r.status() == ChangeForReaderStatus::Unsent && r.unsent_fragments().is_empty()
                });
            if stuck {
                self.finalize_sent(state, reader, seq);
            }
        }

        DeliveryResult::Delivered { bytes }
    }

    /// GAP every unsent irrelevant record of `readers` (plus `seq` itself).
    ///
    /// Readers with the same list share one send. Returns `false` on a
    /// transport failure; records of failed readers stay UNSENT.
    fn send_gaps(&self, state: &mut WriterState, seq: SequenceNumber, readers: &[Guid]) -> bool {
        let mut groups: BTreeMap<Vec<SequenceNumber>, Vec<Guid>> = BTreeMap::new();
        for reader in readers {
            let Some(proxy) = state.proxies.get(reader) else {
                continue;
            };
            let mut seqs = proxy.unsent_irrelevant();
            if let Err(pos) = seqs.binary_search(&seq) {
                seqs.insert(pos, seq);
            }
            groups.entry(seqs).or_default().push(*reader);
        }

        let mut all_sent = true;
        for (seqs, dests) in groups {
            let gaps = GapMsg::from_sequences(self.guid, &seqs);
            let count = gaps.len() as u64;
            let mut failed = false;
            for gap in gaps {
                if let Err(err) = self.transport.send(&Submessage::Gap(gap), &dests) {
                    self.metrics.increment_send_failures();
                    log::trace!("[writer] {} GAP send failed: {}", self.guid, err);
                    failed = true;
                    break;
                }
            }
            if failed {
                all_sent = false;
                continue;
            }
            self.metrics.increment_gaps_sent(count);
            for reader in dests {
                for gapped in &seqs {
                    self.finalize_sent(state, reader, *gapped);
                }
            }
        }
        all_sent
    }

    /// Status of a record once its bytes reached the transport.
    ///
    /// Best-effort: done. Reliable: UNDERWAY during nack suppression, then
    /// UNACKNOWLEDGED.
    pub(super) fn finalize_sent(&self, state: &mut WriterState, reader: Guid, seq: SequenceNumber) {
        let Some(proxy) = state.proxies.get_mut(&reader) else {
            return;
        };
        if !proxy.is_reliable() {
            proxy.set_status(seq, ChangeForReaderStatus::Acknowledged);
            return;
        }
        let suppression = self.config.nack_suppression_duration;
        if suppression.is_zero() {
            proxy.set_status(seq, ChangeForReaderStatus::Unacknowledged);
            return;
        }
        if proxy.set_status(seq, ChangeForReaderStatus::Underway) && !proxy.nack_suppression_armed
        {
            proxy.nack_suppression_armed = true;
            self.timers
                .arm(TimerKey::NackSuppression(reader), Instant::now() + suppression);
        }
    }
}

impl FlowControllerClient for WriterShared {
    fn deliver_queued(&self, seq: SequenceNumber, budget: Option<ByteBudget>) -> DeliveryResult {
        // Busy writer: the worker retries after its retry interval
        let Some(mut state) = self.state.try_lock_for(LOCK_WAIT) else {
            return DeliveryResult::NotDelivered { bytes: 0 };
        };
        if state.failed {
            return DeliveryResult::Delivered { bytes: 0 };
        }
        self.deliver_locked(&mut state, seq, budget)
    }
}
