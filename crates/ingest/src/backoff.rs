//! Bounded exponential backoff after storage failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Caps the exponent so the multiplication never overflows.
const MAX_EXPONENT: u32 = 20;

/// Tracks consecutive storage failures on a subscription.
///
/// The delay after `n` consecutive failures is `base * 2^(n-1)`, capped at
/// `max`. Any success resets it to zero.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: AtomicU32,
}

impl Backoff {
    /// Creates a backoff with the given base delay and cap.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: AtomicU32::new(0),
        }
    }

    /// Records a failure and returns the delay now in effect.
    pub fn record_failure(&self) -> Duration {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.delay_for(failures)
    }

    /// Records a success, clearing the backoff.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Number of failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// The delay to wait before the next attempt; zero if healthy.
    pub fn current_delay(&self) -> Duration {
        self.delay_for(self.consecutive_failures())
    }

    fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(MAX_EXPONENT);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }
}
