//! Retry policy: exponential backoff with a hard cap.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule for failed tasks.
///
/// `delay = min(base_delay * 2^(attempts - 1), max_delay)`, so with the
/// defaults attempts 1, 2, 3, 4 wait 100ms, 200ms, 400ms, 800ms and the delay
/// never exceeds five minutes. Jitter (off by default) spreads a delay
/// uniformly over `[delay/2, delay]` to de-correlate retry storms.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5 * 60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the number of attempts already
    /// made (1-indexed; 0 is treated as a first attempt).
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis() as u64;
        let capped_ms = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);

        if self.jitter && capped_ms > 0 {
            let jittered = rand::thread_rng().gen_range(capped_ms / 2..=capped_ms);
            Duration::from_millis(jittered)
        } else {
            Duration::from_millis(capped_ms)
        }
    }
}
