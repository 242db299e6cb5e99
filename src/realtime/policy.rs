// realtime/policy.rs
use std::time::Duration;

use rand::Rng;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_FACTOR: u32 = 2;

/// Exponential backoff with jitter for reconnect attempts.
///
/// Attempt `n` (starting at 0) has a ceiling of `base * factor^n`, capped at
/// `max`; the actual delay is drawn uniformly from `[ceiling / 2, ceiling]`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    factor: u32,
    max: Duration,
    attempt: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::new(DEFAULT_BASE_DELAY, DEFAULT_FACTOR, DEFAULT_MAX_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, factor: u32, max: Duration) -> Self {
        ReconnectPolicy {
            base,
            factor: factor.max(1),
            max,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn ceiling(&self, attempt: u32) -> Duration {
        let multiplier = (self.factor as u64).saturating_pow(attempt.min(32));
        let millis = (self.base.as_millis() as u64).saturating_mul(multiplier);
        Duration::from_millis(millis).min(self.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let high = ceiling.as_millis() as u64;
        let low = high / 2;
        if high == 0 {
            return Duration::ZERO;
        }

        Duration::from_millis(rng.random_range(low..=high))
    }

    /// Called after a connection succeeds.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_ceiling_grows_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.ceiling(0), Duration::from_millis(500));
        assert_eq!(policy.ceiling(1), Duration::from_millis(1000));
        assert_eq!(policy.ceiling(3), Duration::from_millis(4000));
        assert_eq!(policy.ceiling(6), Duration::from_secs(30));
        assert_eq!(policy.ceiling(200), Duration::from_secs(30));
    }

    #[test]
    fn test_delays_stay_within_jitter_bounds() {
        let mut policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..12 {
            let ceiling = policy.ceiling(attempt);
            let delay = policy.next_delay_with(&mut rng);
            assert!(delay <= ceiling, "attempt {} delay {:?}", attempt, delay);
            assert!(delay >= ceiling / 2, "attempt {} delay {:?}", attempt, delay);
        }
    }

    #[test]
    fn test_reset_starts_over() {
        let mut policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..5 {
            policy.next_delay_with(&mut rng);
        }
        assert_eq!(policy.attempt(), 5);

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert!(policy.next_delay_with(&mut rng) <= Duration::from_millis(500));
    }
}
