// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer timer thread.
//!
//! Timers are one-shot deadlines keyed by `TimerKey`. The writer posts
//! `Arm`/`Cancel` commands over a channel (never blocking, even with the
//! writer lock held); the timer thread fires due keys by calling back into
//! the writer with no lock held, so the writer lock needs no re-entrancy.
//!
//! ```text
//! writer ---Arm(key, deadline)---> [timer thread] ---on_timer(key)---> writer
//!        ---Cancel(key)--------->        |
//!        ---Stop---------------->      exit
//! ```

use std::collections::HashMap;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::Result;
use crate::types::Guid;

/// Identity of one pending deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    /// Periodic writer heartbeat
    Heartbeat,
    /// REQUESTED -> UNSENT for one reader
    NackResponse(Guid),
    /// UNDERWAY -> UNACKNOWLEDGED for one reader
    NackSuppression(Guid),
}

#[derive(Debug)]
enum TimerCommand {
    /// Set (or replace) the deadline of a key
    Arm(TimerKey, Instant),
    Cancel(TimerKey),
    Stop,
}

/// Callback target of the timer thread.
pub(crate) trait TimerHandler: Send + Sync {
    /// Handle an expired key; returning a deadline re-arms it.
    fn on_timer(&self, key: TimerKey) -> Option<Instant>;
}

/// Cloneable sender side, held by the writer.
#[derive(Debug, Clone)]
pub(crate) struct TimerHandle {
    tx: Sender<TimerCommand>,
}

impl TimerHandle {
    pub(crate) fn arm(&self, key: TimerKey, deadline: Instant) {
        if self.tx.send(TimerCommand::Arm(key, deadline)).is_err() {
            log::trace!("[timers] thread gone, {:?} not armed", key);
        }
    }

    pub(crate) fn cancel(&self, key: TimerKey) {
        let _ = self.tx.send(TimerCommand::Cancel(key));
    }
}

/// Create the command channel before the handler exists.
pub(crate) fn channel() -> (TimerHandle, TimerReceiver) {
    let (tx, rx) = channel::unbounded();
    (TimerHandle { tx }, TimerReceiver { rx })
}

/// Receiving side, consumed by `TimerThread::spawn`.
pub(crate) struct TimerReceiver {
    rx: Receiver<TimerCommand>,
}

/// Owns the timer thread; stops and joins it on drop.
pub(crate) struct TimerThread {
    handle: TimerHandle,
    thread: Option<JoinHandle<()>>,
}

impl TimerThread {
    pub(crate) fn spawn<H>(
        name: String,
        handle: TimerHandle,
        receiver: TimerReceiver,
        handler: Weak<H>,
    ) -> Result<Self>
    where
        H: TimerHandler + 'static,
    {
        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || run(receiver.rx, handler))?;
        Ok(Self {
            handle,
            thread: Some(worker),
        })
    }

    pub(crate) fn stop(&mut self) {
        let _ = self.handle.tx.send(TimerCommand::Stop);
        if let Some(worker) = self.thread.take() {
            // A listener callback may drop the writer from the timer thread itself
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                log::error!("[timers] timer thread panicked");
            }
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<H: TimerHandler>(rx: Receiver<TimerCommand>, handler: Weak<H>) {
    let mut deadlines: HashMap<TimerKey, Instant> = HashMap::new();

    loop {
        let next = deadlines.values().min().copied();
        let command = match next {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(TimerCommand::Arm(key, deadline)) => {
                deadlines.insert(key, deadline);
            }
            Ok(TimerCommand::Cancel(key)) => {
                deadlines.remove(&key);
            }
            Ok(TimerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                let due: Vec<TimerKey> = deadlines
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(key, _)| *key)
                    .collect();
                for key in due {
                    deadlines.remove(&key);
                    let Some(target) = handler.upgrade() else {
                        log::debug!("[timers] writer dropped, exiting");
                        return;
                    };
                    if let Some(next) = target.on_timer(key) {
                        deadlines.insert(key, next);
                    }
                }
            }
        }
    }
    log::debug!("[timers] stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<TimerKey>>,
        rearm_heartbeat: Mutex<u32>,
    }

    impl TimerHandler for Recorder {
        fn on_timer(&self, key: TimerKey) -> Option<Instant> {
            self.fired.lock().push(key);
            let mut rearm = self.rearm_heartbeat.lock();
            if key == TimerKey::Heartbeat && *rearm > 0 {
                *rearm -= 1;
                return Some(Instant::now() + Duration::from_millis(5));
            }
            None
        }
    }

    fn reader(n: u8) -> Guid {
        Guid::new([n; 12], [0, 0, 1, 0x07])
    }

    #[test]
    fn test_fire_cancel_and_rearm() {
        let recorder = Arc::new(Recorder::default());
        *recorder.rearm_heartbeat.lock() = 2;
        let (handle, receiver) = channel();
        let mut timers = TimerThread::spawn(
            "test-timers".into(),
            handle.clone(),
            receiver,
            Arc::downgrade(&recorder),
        )
        .expect("spawn");

        let now = Instant::now();
        handle.arm(TimerKey::Heartbeat, now + Duration::from_millis(5));
        handle.arm(TimerKey::NackResponse(reader(1)), now + Duration::from_millis(10));
        handle.arm(TimerKey::NackSuppression(reader(2)), now + Duration::from_millis(20));
        handle.cancel(TimerKey::NackSuppression(reader(2)));

        thread::sleep(Duration::from_millis(150));
        timers.stop();

        let fired = recorder.fired.lock().clone();
        assert_eq!(
            fired.iter().filter(|k| **k == TimerKey::Heartbeat).count(),
            3,
            "initial + two re-arms"
        );
        assert!(fired.contains(&TimerKey::NackResponse(reader(1))));
        assert!(!fired.contains(&TimerKey::NackSuppression(reader(2))));
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let recorder = Arc::new(Recorder::default());
        let (handle, receiver) = channel();
        let _timers = TimerThread::spawn(
            "test-timers".into(),
            handle.clone(),
            receiver,
            Arc::downgrade(&recorder),
        )
        .expect("spawn");

        let key = TimerKey::NackResponse(reader(1));
        handle.arm(key, Instant::now() + Duration::from_secs(60));
        handle.arm(key, Instant::now() + Duration::from_millis(5));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.fired.lock().as_slice(), &[key]);
    }
}
