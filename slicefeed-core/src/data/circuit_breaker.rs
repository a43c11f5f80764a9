//! Circuit breaker for remote sources.
//!
//! Remote-file downloads and REST polls go through a breaker shared by every
//! reader of the same host. After `failure_threshold` consecutive failures, or
//! immediately on an HTTP 403/429, the breaker opens and every request is
//! refused until the cooldown has passed. Refused requests count as "no data
//! for this date" for the reader.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { tripped_at: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner { state: BreakerState::Closed, consecutive_failures: 0 }),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Five-minute cooldown after three consecutive failures.
    pub fn for_downloads() -> Self {
        Self::new(Duration::from_secs(5 * 60), 3)
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Whether a request may go out now. Closes an open breaker whose cooldown expired.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } if tripped_at.elapsed() >= self.cooldown => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        self.inner.lock().consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.state = BreakerState::Open { tripped_at: Instant::now() };
        }
    }

    /// Open immediately (forbidden / rate limited).
    pub fn trip(&self) {
        self.inner.lock().state = BreakerState::Open { tripped_at: Instant::now() };
    }

    pub fn remaining_cooldown(&self) -> Duration {
        match self.inner.lock().state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { tripped_at } => self.cooldown.saturating_sub(tripped_at.elapsed()),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::for_downloads()
    }
}
