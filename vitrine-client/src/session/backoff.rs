use crate::config::ReconnectPolicy;
use std::time::Duration;

/// Capped exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            base: Duration::from_millis(policy.base_delay_ms),
            max: Duration::from_millis(policy.max_delay_ms),
            max_attempts: policy.max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` once every attempt is used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor).min(self.max))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
