//! Reconnect backoff policy.
//!
//! Pure counter arithmetic so the schedule is testable without a clock:
//! 1s, 2s, 4s, 8s, 16s, then exhaustion. The transport supervisor owns
//! the actual timers.

use std::time::Duration;

/// Delay before the first retry.
pub const INITIAL_DELAY_MS: u64 = 1_000;

/// Ceiling applied to the exponential schedule.
pub const MAX_DELAY_MS: u64 = 30_000;

/// Consecutive failed attempts before giving up.
pub const MAX_ATTEMPTS: u32 = 5;

/// What the supervisor should do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Schedule attempt number `attempt` (1-based) after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The attempt budget is spent; stop retrying automatically.
    Exhausted,
}

/// Tracks consecutive reconnect attempts and yields the delay for each.
///
/// `reset` is called on every successful connection and on manual
/// disconnect, so the budget always refers to a single outage.
#[derive(Debug, Default, Clone)]
pub struct ReconnectPolicy {
    attempt: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Consumes one attempt from the budget.
    pub fn next_delay(&mut self) -> Decision {
        if self.attempt >= MAX_ATTEMPTS {
            return Decision::Exhausted;
        }
        self.attempt += 1;
        let delay_ms = INITIAL_DELAY_MS
            .saturating_mul(1 << (self.attempt - 1))
            .min(MAX_DELAY_MS);
        Decision::Retry {
            attempt: self.attempt,
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// Attempts consumed since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}
