//! Reconnection backoff policy.
//!
//! The delay doubles per failed attempt from a fixed base, capped, and the
//! state is pure bookkeeping: callers perform the actual sleep so the logic
//! stays trivially testable.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Default)]
pub struct ReconnectState {
    attempt: u32,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt and decide the next step. The counter moves
    /// before the delay is computed, so the first retry already waits
    /// `base * 2`.
    pub fn next(&mut self, policy: &ReconnectPolicy) -> ReconnectDecision {
        self.attempt += 1;
        if self.attempt > policy.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        let millis = (policy.base_delay.as_millis() as u64)
            .saturating_mul(1u64 << self.attempt.min(32));
        ReconnectDecision::RetryAfter(Duration::from_millis(millis).min(policy.max_delay))
    }

    /// Called after a successful connection so the next outage starts the
    /// schedule over.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
