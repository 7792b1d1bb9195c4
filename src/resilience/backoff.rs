//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Fraction of the base delay added as random jitter.
pub const DEFAULT_JITTER_RATIO: f64 = 0.3;

/// Computes retry delays: `min(initial * 2^attempt, max)` plus up to 30% jitter.
///
/// The attempt index is zero-based for the first retry; the initial
/// attempt is never delayed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
}

impl BackoffPolicy {
    /// Create a policy with the default jitter ratio.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }

    /// Override the jitter ratio (clamped to `0.0..=1.0`).
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Cap on the non-jittered delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Upper bound on any value returned by [`delay_for`](Self::delay_for).
    pub fn ceiling(&self) -> Duration {
        self.max_delay.mul_f64(1.0 + self.jitter_ratio)
    }

    /// Non-jittered delay for the given retry index.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay for the given retry index.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ratio <= 0.0 || base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        base.mul_f64(1.0 + jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(10_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(2000));

        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay(10), Duration::from_millis(2000));

        let d0 = policy.delay_for(0);
        assert!(d0 >= Duration::from_millis(100));
        assert!(d0 <= Duration::from_millis(130));
    }

    #[test]
    fn test_base_is_monotonic_and_delay_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(5));
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let base = policy.base_delay(attempt);
            assert!(base >= previous, "base delay decreased at attempt {}", attempt);
            previous = base;

            let delay = policy.delay_for(attempt);
            assert!(delay >= base);
            assert!(delay <= policy.ceiling(), "attempt {} exceeded ceiling: {:?}", attempt, delay);
        }
        assert_eq!(policy.ceiling(), Duration::from_millis(6500));
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(80)).with_jitter(0.0);
        assert_eq!(policy.delay_for(3), Duration::from_millis(80));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
    }
}
