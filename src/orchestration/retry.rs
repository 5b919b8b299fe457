//! Bounded retry with jittered exponential backoff for conditional writes.

use std::time::Duration;

/// How many conditional-write attempts a claim gets and how long to wait
/// between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    /// Fraction of the computed delay added as random jitter, in [0, 1].
    jitter_ratio: f64,
}

impl RetryPolicy {
    /// Default attempt bound.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Retry immediately, without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO, 0.0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt-1)`, capped, plus jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter_ratio <= 0.0 || capped.is_zero() {
            return capped;
        }
        capped + capped.mul_f64(self.jitter_ratio * rand::random::<f64>())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(25),
            Duration::from_millis(500),
            0.5,
        )
    }
}
