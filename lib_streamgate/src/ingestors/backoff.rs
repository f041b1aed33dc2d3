//! # Reconnect Backoff

use rand::Rng;
use std::time::Duration;

/// Exponential delay capped at `max`, with "equal jitter": half of each delay
/// is fixed, the other half random.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
            jitter: true,
        }
    }

    /// Deterministic delays, for tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt. Grows until it reaches `max`.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(20);
        self.attempt = self.attempt.saturating_add(1);

        let delay = self.base.saturating_mul(1u32 << exp).min(self.max);
        if !self.jitter {
            return delay;
        }

        let half = delay / 2;
        let spread = half.as_millis() as u64;
        let extra = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        half + Duration::from_millis(extra)
    }

    /// Call once a connection has been established.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_up_to_the_cap() {
        let mut backoff = Backoff::default().without_jitter();
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(
            delays,
            vec![500, 1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]
        );

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_the_upper_half() {
        let mut backoff = Backoff::new(Duration::from_millis(400), Duration::from_secs(5));
        for expected in [400u128, 800, 1_600, 3_200, 5_000, 5_000] {
            let delay = backoff.next_delay().as_millis();
            assert!(delay >= expected / 2 && delay <= expected, "{} not in range of {}", delay, expected);
        }
    }

    #[test]
    fn survives_many_attempts() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60)).without_jitter();
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }
}
