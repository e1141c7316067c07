// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static configuration for writers and flow controllers.
//!
//! Configuration is supplied once at construction and validated fail-fast.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use hdds_reliable::{HistoryKind, WriterConfig};
//!
//! let config = WriterConfig {
//!     history: HistoryKind::KeepLast(16),
//!     nack_response_delay: Duration::from_millis(2),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

#[cfg(feature = "config-loaders")]
pub mod loader;

use std::time::Duration;

use crate::error::{Error, Result};

/// Special value meaning "no limit" for counts and byte budgets.
pub const LENGTH_UNLIMITED: usize = usize::MAX;

/// Name under which the default flow controller is registered.
pub const DEFAULT_FLOW_CONTROLLER: &str = "default";

/// Default DATA_FRAG fragment size in bytes.
pub const DEFAULT_FRAGMENT_SIZE: usize = 1024;

/// Reliability policy of a writer or reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReliabilityKind {
    /// Fire-and-forget (no ACKs, no retransmission)
    BestEffort,
    /// Explicit acknowledgement with NACK-driven retransmission
    #[default]
    Reliable,
}

/// Durability policy. Ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DurabilityKind {
    /// Late joiners only see samples written after they matched.
    #[default]
    Volatile,
    /// Writer replays its history to late joiners.
    TransientLocal,
    Transient,
    Persistent,
}

impl DurabilityKind {
    /// True when late-joining readers are entitled to historical samples.
    pub fn replays_history(self) -> bool {
        self >= DurabilityKind::TransientLocal
    }
}

/// History policy of the writer cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HistoryKind {
    /// Keep last N samples, evicting the oldest when full.
    KeepLast(u32),
    /// Keep every sample within `max_samples`; writes block when full.
    KeepAll,
}

impl Default for HistoryKind {
    fn default() -> Self {
        Self::KeepLast(100)
    }
}

/// How a flow controller turns "ready to send" into "on the wire".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PublishMode {
    /// Caller thread sends inline; failures surface to the caller.
    PureSync,
    /// Caller thread sends inline; failures are queued for asynchronous retry.
    #[default]
    SyncWithFallback,
    /// Every send goes through the worker thread.
    Async,
    /// Worker thread sends under a per-period byte budget.
    BandwidthLimitedAsync,
}

impl PublishMode {
    /// True if the caller thread attempts the send itself.
    pub fn is_synchronous(self) -> bool {
        matches!(self, PublishMode::PureSync | PublishMode::SyncWithFallback)
    }
}

/// Selection policy of the flow controller worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SchedulingDiscipline {
    /// Oldest pending entry overall.
    #[default]
    Fifo,
    /// One bucket per writer, served in rotation.
    RoundRobin,
    /// Lowest priority value first.
    HighPriority,
    /// Priority order, constrained by each writer's bandwidth reservation.
    PriorityWithReservation,
}

/// Reader QoS as announced by discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReaderQos {
    pub reliability: ReliabilityKind,
    pub durability: DurabilityKind,
}

impl ReaderQos {
    /// Reliable, volatile reader.
    pub fn reliable() -> Self {
        Self {
            reliability: ReliabilityKind::Reliable,
            durability: DurabilityKind::Volatile,
        }
    }

    /// Best-effort, volatile reader.
    pub fn best_effort() -> Self {
        Self {
            reliability: ReliabilityKind::BestEffort,
            durability: DurabilityKind::Volatile,
        }
    }

    #[must_use]
    pub fn with_durability(mut self, durability: DurabilityKind) -> Self {
        self.durability = durability;
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability == ReliabilityKind::Reliable
    }
}

/// Writer configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriterConfig {
    pub reliability: ReliabilityKind,
    pub durability: DurabilityKind,
    /// Push mode sends new samples proactively; pull mode waits for NACKs.
    pub push_mode: bool,
    /// Delay between a NACK and the resend it triggers (coalesces NACK bursts).
    pub nack_response_delay: Duration,
    /// Window after a send during which NACKs for that sample are ignored.
    pub nack_suppression_duration: Duration,
    /// Periodic HEARTBEAT interval (zero disables it).
    pub heartbeat_period: Duration,
    pub history: HistoryKind,
    /// History capacity for KEEP_ALL (and upper bound for KEEP_LAST depth).
    pub max_samples: usize,
    /// Longest time a KEEP_ALL write blocks waiting for room.
    pub max_blocking_time: Duration,
    /// Samples larger than this are sent as DATA_FRAG.
    pub fragment_size: usize,
    /// Named flow controller; `None` selects the default controller.
    pub flow_controller: Option<String>,
    /// Scheduling priority (lower value is served first).
    pub priority: i32,
    /// Share of the controller bandwidth reserved for this writer, in percent.
    pub bandwidth_reservation: u8,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            reliability: ReliabilityKind::Reliable,
            durability: DurabilityKind::Volatile,
            push_mode: true,
            nack_response_delay: Duration::from_millis(5),
            nack_suppression_duration: Duration::ZERO,
            heartbeat_period: Duration::from_millis(100),
            history: HistoryKind::default(),
            max_samples: 5000,
            max_blocking_time: Duration::from_millis(100),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            flow_controller: None,
            priority: 0,
            bandwidth_reservation: 0,
        }
    }
}

impl WriterConfig {
    /// Best-effort variant of the default configuration.
    pub fn best_effort() -> Self {
        Self {
            reliability: ReliabilityKind::BestEffort,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// # Validation Rules
    ///
    /// - `HistoryKind::KeepLast(n)` requires n > 0
    /// - `max_samples` > 0
    /// - `fragment_size` > 0
    /// - `bandwidth_reservation` is a percentage (0..=100)
    pub fn validate(&self) -> Result<()> {
        if self.history == HistoryKind::KeepLast(0) {
            return Err(Error::InvalidConfig(
                "HistoryKind::KeepLast(n) requires n > 0".to_string(),
            ));
        }
        if self.max_samples == 0 {
            return Err(Error::InvalidConfig("max_samples must be > 0".to_string()));
        }
        if self.fragment_size == 0 {
            return Err(Error::InvalidConfig("fragment_size must be > 0".to_string()));
        }
        if self.bandwidth_reservation > 100 {
            return Err(Error::InvalidConfig(format!(
                "bandwidth_reservation ({}) must be a percentage",
                self.bandwidth_reservation
            )));
        }
        Ok(())
    }

    /// Number of samples the history holds before evicting or blocking.
    pub fn history_capacity(&self) -> usize {
        match self.history {
            HistoryKind::KeepLast(depth) => (depth as usize).min(self.max_samples),
            HistoryKind::KeepAll => self.max_samples,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.reliability == ReliabilityKind::Reliable
    }
}

/// Flow controller configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowControllerConfig {
    pub name: String,
    pub publish_mode: PublishMode,
    pub scheduling: SchedulingDiscipline,
    /// Byte budget per period (`LENGTH_UNLIMITED` disables limiting).
    pub max_bytes_per_period: usize,
    /// Length of one budget period.
    pub period: Duration,
    /// Delay before retrying an entry whose send failed transiently.
    pub retry_interval: Duration,
}

impl Default for FlowControllerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_FLOW_CONTROLLER.to_string(),
            publish_mode: PublishMode::SyncWithFallback,
            scheduling: SchedulingDiscipline::Fifo,
            max_bytes_per_period: LENGTH_UNLIMITED,
            period: Duration::from_millis(100),
            retry_interval: Duration::from_millis(10),
        }
    }
}

impl FlowControllerConfig {
    /// Asynchronous controller with the given discipline.
    pub fn asynchronous(name: impl Into<String>, scheduling: SchedulingDiscipline) -> Self {
        Self {
            name: name.into(),
            publish_mode: PublishMode::Async,
            scheduling,
            ..Self::default()
        }
    }

    /// Bandwidth-limited asynchronous controller.
    pub fn bandwidth_limited(
        name: impl Into<String>,
        scheduling: SchedulingDiscipline,
        max_bytes_per_period: usize,
        period: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            publish_mode: PublishMode::BandwidthLimitedAsync,
            scheduling,
            max_bytes_per_period,
            period,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// Bandwidth-limited mode requires a finite, non-zero byte budget and a
    /// non-zero period.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig(
                "flow controller name must not be empty".to_string(),
            ));
        }
        if self.publish_mode == PublishMode::BandwidthLimitedAsync {
            if self.max_bytes_per_period == 0 || self.max_bytes_per_period == LENGTH_UNLIMITED {
                return Err(Error::InvalidConfig(format!(
                    "flow controller '{}': bandwidth-limited mode requires a finite max_bytes_per_period",
                    self.name
                )));
            }
            if self.period.is_zero() {
                return Err(Error::InvalidConfig(format!(
                    "flow controller '{}': bandwidth-limited mode requires a non-zero period",
                    self.name
                )));
            }
        }
        if self.retry_interval.is_zero() {
            return Err(Error::InvalidConfig(format!(
                "flow controller '{}': retry_interval must be > 0",
                self.name
            )));
        }
        Ok(())
    }

    /// True if this controller enforces a byte budget.
    pub fn is_bandwidth_limited(&self) -> bool {
        self.publish_mode == PublishMode::BandwidthLimitedAsync
    }
}
