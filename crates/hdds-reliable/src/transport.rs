// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Send capability consumed by the writer.
//!
//! ```ignore
//! pub trait Transport: Send + Sync {
//!     fn send(&self, message: &Submessage, destinations: &[Guid]) -> io::Result<()>;
//! }
//! ```
//!
//! Serialization and sockets live behind this trait. A send that cannot be
//! performed right now (socket buffer full, peer unreachable) returns an
//! error; the flow controller keeps the sample queued and retries later.
//!
//! # Implementations
//!
//! - `ChannelTransport` - in-process loopback over a bounded crossbeam channel

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::reliability::Submessage;
use crate::types::Guid;

/// Trait for transports used by the reliable writer.
pub trait Transport: Send + Sync {
    /// Send one submessage to every destination in one operation.
    ///
    /// # Returns
    /// * `Ok(())` once handed to the network
    /// * `Err` with `ErrorKind::WouldBlock` on back-pressure, or any other I/O error
    fn send(&self, message: &Submessage, destinations: &[Guid]) -> io::Result<()>;
}

/// A submessage as delivered by [`ChannelTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub message: Submessage,
    pub destinations: Vec<Guid>,
}

/// Transport statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub payload_bytes_sent: u64,
    /// Sends refused because the channel was full.
    pub would_block: u64,
}

/// In-process loopback transport backed by a bounded channel.
///
/// A full channel reports `WouldBlock`, which exercises the writer's
/// transient-failure path exactly like a saturated socket.
pub struct ChannelTransport {
    tx: Sender<Outbound>,
    messages_sent: AtomicU64,
    payload_bytes_sent: AtomicU64,
    would_block: AtomicU64,
}

impl ChannelTransport {
    /// Create a transport and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Outbound>) {
        let (tx, rx) = channel::bounded(capacity);
        (Self::from_sender(tx), rx)
    }

    /// Create a transport whose channel never fills.
    pub fn unbounded() -> (Self, Receiver<Outbound>) {
        let (tx, rx) = channel::unbounded();
        (Self::from_sender(tx), rx)
    }

    fn from_sender(tx: Sender<Outbound>) -> Self {
        Self {
            tx,
            messages_sent: AtomicU64::new(0),
            payload_bytes_sent: AtomicU64::new(0),
            would_block: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            payload_bytes_sent: self.payload_bytes_sent.load(Ordering::Relaxed),
            would_block: self.would_block.load(Ordering::Relaxed),
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: &Submessage, destinations: &[Guid]) -> io::Result<()> {
        let outbound = Outbound {
            message: message.clone(),
            destinations: destinations.to_vec(),
        };
        match self.tx.try_send(outbound) {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.payload_bytes_sent
                    .fetch_add(message.payload_len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.would_block.fetch_add(1, Ordering::Relaxed);
                Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "loopback channel full",
                ))
            }
            Err(TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback receiver dropped",
            )),
        }
    }
}
