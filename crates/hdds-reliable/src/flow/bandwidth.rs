// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-period byte budget.
//!
//! Unlike a token bucket there is no gradual refill: the full budget becomes
//! available again at every period boundary, whatever happened before.

use std::time::{Duration, Instant};

/// Remaining send allowance handed to a flow controller client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteBudget {
    /// Bytes that may still be sent in the current period.
    pub remaining: usize,
    /// Nothing has been sent yet in this period.
    ///
    /// A sample larger than the whole period budget may be sent in a fresh
    /// period, otherwise it would never leave the queue.
    pub fresh_period: bool,
}

impl ByteBudget {
    /// True if `bytes` may be sent now.
    pub fn allows(&self, bytes: usize) -> bool {
        bytes <= self.remaining || self.fresh_period
    }

    /// Account for `bytes` just sent.
    pub fn consume(&mut self, bytes: usize) {
        self.remaining = self.remaining.saturating_sub(bytes);
        if bytes > 0 {
            self.fresh_period = false;
        }
    }
}

/// Byte budget that resets at each period boundary.
#[derive(Debug)]
pub(crate) struct PeriodBudget {
    /// `None` = unlimited
    max_bytes: Option<usize>,
    period: Duration,
    period_start: Instant,
    used: usize,
}

impl PeriodBudget {
    pub(crate) fn new(max_bytes: Option<usize>, period: Duration) -> Self {
        Self {
            max_bytes,
            period,
            period_start: Instant::now(),
            used: 0,
        }
    }

    /// Unlimited budget (no period accounting needed by callers).
    pub(crate) fn unlimited(period: Duration) -> Self {
        Self::new(None, period)
    }

    /// Start a new period if the current one is over.
    ///
    /// Returns `true` if the budget was reset.
    pub(crate) fn refresh(&mut self, now: Instant) -> bool {
        if self.period.is_zero() || now < self.period_start + self.period {
            return false;
        }
        // Skip whole elapsed periods so the boundary grid stays fixed
        let elapsed = now.duration_since(self.period_start);
        let periods = elapsed.as_nanos() / self.period.as_nanos().max(1);
        let advance = self.period.saturating_mul(u32::try_from(periods).unwrap_or(u32::MAX));
        self.period_start += advance;
        if self.period_start > now {
            self.period_start = now;
        }
        self.used = 0;
        true
    }

    /// Budget available to the next delivery, `None` if unlimited.
    pub(crate) fn available(&self) -> Option<ByteBudget> {
        self.max_bytes.map(|max| ByteBudget {
            remaining: max.saturating_sub(self.used),
            fresh_period: self.used == 0,
        })
    }

    pub(crate) fn consume(&mut self, bytes: usize) {
        self.used = self.used.saturating_add(bytes);
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        matches!(self.max_bytes, Some(max) if self.used >= max)
    }

    pub(crate) fn max_bytes(&self) -> Option<usize> {
        self.max_bytes
    }

    pub(crate) fn used(&self) -> usize {
        self.used
    }

    /// Instant of the next period boundary.
    pub(crate) fn next_reset(&self) -> Instant {
        self.period_start + self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_allows_oversized_sample_in_fresh_period() {
        let mut budget = ByteBudget {
            remaining: 100,
            fresh_period: true,
        };
        assert!(budget.allows(500));
        budget.consume(500);
        assert!(!budget.allows(1));
        assert_eq!(budget.remaining, 0);
    }

    #[test]
    fn test_period_reset_is_unconditional() {
        let mut budget = PeriodBudget::new(Some(1000), Duration::from_millis(10));
        budget.consume(5000);
        assert!(budget.is_exhausted());
        assert_eq!(budget.available().map(|b| b.remaining), Some(0));

        let later = budget.next_reset() + Duration::from_millis(25);
        assert!(budget.refresh(later));
        assert_eq!(budget.used(), 0);
        assert_eq!(
            budget.available(),
            Some(ByteBudget {
                remaining: 1000,
                fresh_period: true
            })
        );
        assert!(budget.next_reset() > later);
    }

    #[test]
    fn test_unlimited_budget() {
        let mut budget = PeriodBudget::unlimited(Duration::from_millis(10));
        budget.consume(usize::MAX);
        assert!(budget.available().is_none());
        assert!(!budget.is_exhausted());
    }
}
