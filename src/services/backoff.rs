//! Adaptive backoff for the scheduling loop and outbound retries.

use std::time::Duration;

/// Linear backoff: grows by `step` per empty or failed attempt up to `max`,
/// and drops to zero on any success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveBackoff {
    step: Duration,
    max: Duration,
    current: Duration,
}

impl AdaptiveBackoff {
    /// Start at zero.
    pub const fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            current: Duration::ZERO,
        }
    }

    /// Current wait.
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Record an empty or failed attempt and return the new wait.
    pub fn increase(&mut self) -> Duration {
        self.current = (self.current + self.step).min(self.max);
        self.current
    }

    /// Record a successful attempt.
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increase_is_capped() {
        let mut backoff = AdaptiveBackoff::new(Duration::from_secs(10), Duration::from_secs(60));
        let waits: Vec<u64> = (0..8).map(|_| backoff.increase().as_secs()).collect();
        assert_eq!(waits, vec![10, 20, 30, 40, 50, 60, 60, 60]);
    }

    #[test]
    fn test_reset_returns_to_zero() {
        let mut backoff = AdaptiveBackoff::new(Duration::from_secs(10), Duration::from_secs(60));
        backoff.increase();
        backoff.increase();
        backoff.reset();
        assert_eq!(backoff.current(), Duration::ZERO);
        assert_eq!(backoff.increase(), Duration::from_secs(10));
    }

    #[test]
    fn test_step_larger_than_max() {
        let mut backoff = AdaptiveBackoff::new(Duration::from_secs(90), Duration::from_secs(60));
        assert_eq!(backoff.increase(), Duration::from_secs(60));
    }
}
