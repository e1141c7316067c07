// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker wake-up signal with an atomic fast path.
//!
//! Producers (writers submitting samples, `stop()`) only touch an atomic flag
//! unless the worker is actually parked; the worker parks on a condvar with a
//! deadline (retry interval or bandwidth period boundary).

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    /// Set by producers, consumed by the worker
    pending: AtomicBool,
    /// True while the worker is parked on `condvar`
    parked: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Signal new work (or a stop request).
    pub(crate) fn notify(&self) {
        self.pending.store(true, Ordering::Release);

        // Racy check is fine: a waiter re-checks `pending` under the lock
        if *self.parked.lock() {
            self.condvar.notify_one();
        }
    }

    /// Park until notified or until `timeout` elapses.
    ///
    /// Returns `true` if woken by a notification (including one that arrived
    /// before the call).
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.pending.swap(false, Ordering::Acquire) {
            return true;
        }

        let mut parked = self.parked.lock();
        if self.pending.swap(false, Ordering::Acquire) {
            return true;
        }

        *parked = true;
        let _ = self.condvar.wait_for(&mut parked, timeout);
        *parked = false;

        self.pending.swap(false, Ordering::Acquire)
    }

    /// Park until notified or until `deadline` (no deadline = until notified).
    pub(crate) fn wait_until(&self, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                if timeout.is_zero() {
                    return self.pending.swap(false, Ordering::Acquire);
                }
                self.wait_timeout(timeout)
            }
            None => loop {
                if self.wait_timeout(Duration::from_secs(3600)) {
                    return true;
                }
            },
        }
    }
}
