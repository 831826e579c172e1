//! Exponential backoff with jitter for transient send failures.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay schedule for retrying one message.
///
/// Yields `max_attempts - 1` delays, then `None`.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    next: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 1,
            max_attempts: config.max_attempts.max(1),
            next: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier.max(1),
        }
    }

    /// Attempts made so far, including the first.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` when attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;

        let base = self.next.min(self.max_delay);
        self.next = self.next.saturating_mul(self.multiplier).min(self.max_delay);

        let jitter: f64 = rand::thread_rng().gen_range(-0.1..=0.1);
        let jittered = base.mul_f64(1.0 + jitter);
        Some(jittered.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32, initial_ms: u64, max_ms: u64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_multiplier: 2,
        }
    }

    fn within_jitter(actual: Duration, expected_ms: u64) -> bool {
        let ms = actual.as_secs_f64() * 1000.0;
        let expected = expected_ms as f64;
        ms >= expected * 0.9 - 1.0 && ms <= expected * 1.1 + 1.0
    }

    #[test]
    fn yields_one_delay_per_retry() {
        let mut backoff = Backoff::new(&config(3, 100, 10_000));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn single_attempt_never_retries() {
        let mut backoff = Backoff::new(&config(1, 100, 10_000));
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn delays_grow_exponentially() {
        let mut backoff = Backoff::new(&config(4, 100, 10_000));
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(delays.len(), 3);
        assert!(within_jitter(delays[0], 100), "{:?}", delays[0]);
        assert!(within_jitter(delays[1], 200), "{:?}", delays[1]);
        assert!(within_jitter(delays[2], 400), "{:?}", delays[2]);
    }

    #[test]
    fn delays_capped() {
        let mut backoff = Backoff::new(&config(6, 1000, 1500));
        while let Some(delay) = backoff.next_delay() {
            assert!(delay <= Duration::from_millis(1500), "{delay:?}");
        }
    }
}
