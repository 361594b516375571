//! Retry policy for synthesis attempts.

use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Longest single backoff, whatever the attempt count.
const MAX_DELAY: Duration = Duration::from_secs(300);

/// How often and how patiently a chunk is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Added to every backoff
    pub jitter_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter_floor: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, jitter_floor: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(PipelineError::config("max_retries must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            jitter_floor,
        })
    }

    /// Whether a chunk that has been attempted `attempts` times may try again.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Wait before the next attempt after `attempts` failed ones:
    /// `base * 2^(attempts-1) + jitter_floor`.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .saturating_add(self.jitter_floor)
            .min(MAX_DELAY)
    }
}
