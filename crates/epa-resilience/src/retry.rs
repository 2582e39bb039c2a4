//! Bounded exponential-backoff schedule for transient upstream failures.
//!
//! Delays follow `base_delay * 2^attempt` with a random jitter fraction on
//! top, capped at `max_delay`, so synchronized callers do not hammer a
//! recovering upstream in lockstep. The schedule is pure computation; the
//! sleeping happens in [`crate::policy::UpstreamPolicy`].

use std::time::Duration;

use rand::Rng;

/// Retry budget and backoff shape for one upstream.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first (no retries when 1).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each subsequent retry.
    pub base_delay: Duration,
    /// Ceiling for the exponential component of the delay.
    pub max_delay: Duration,
    /// Jitter fraction added on top of the capped delay, sampled uniformly
    /// from `[0, jitter)`. Zero disables jitter (used by tests).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay to sleep after `completed_attempts` failed attempts
    /// (0 → `base_delay`, 1 → `2 * base_delay`, ...).
    pub fn delay_for(&self, completed_attempts: u32) -> Duration {
        // Exponent clamp keeps the shift well inside u32 range; max_delay
        // caps the result anyway.
        let exponent = completed_attempts.min(16);
        let raw = self.base_delay.saturating_mul(2u32.saturating_pow(exponent));
        let capped = raw.min(self.max_delay);
        if self.jitter <= 0.0 {
            return capped;
        }
        let spread = rand::thread_rng().gen_range(0.0..self.jitter);
        capped + capped.mul_f64(spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(base_ms: u64, max_ms: u64) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter: 0.0,
        }
    }

    #[test]
    fn delays_double_from_the_base() {
        let config = flat(100, 10_000);
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn cap_bounds_the_exponential_tail() {
        let config = flat(100, 350);
        assert_eq!(config.delay_for(2), Duration::from_millis(350));
        assert_eq!(config.delay_for(10), Duration::from_millis(350));
        // Huge attempt counts must not overflow.
        assert_eq!(config.delay_for(u32::MAX), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_its_fraction() {
        let config = RetryConfig {
            jitter: 0.25,
            ..flat(100, 10_000)
        };
        let floor = Duration::from_millis(200);
        let ceiling = Duration::from_millis(250);
        for _ in 0..100 {
            let delay = config.delay_for(1);
            assert!(delay >= floor, "{delay:?} below the exponential floor");
            assert!(delay <= ceiling, "{delay:?} above floor + 25%");
        }
    }
}
