//! Reconnect delay and error-log throttling for the control channel.

use std::time::{Duration, Instant};

/// Reconnect tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay increase per failed attempt
    pub step: Duration,
    /// Delay cap
    pub max: Duration,
    /// Connection lifetime after which the delay resets to zero
    pub healthy_reset: Duration,
    /// Window within which an identical error is logged only once
    pub error_log_cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(10),
            max: Duration::from_secs(120),
            healthy_reset: Duration::from_secs(600),
            error_log_cooldown: Duration::from_secs(300),
        }
    }
}

/// Mutable reconnect state driven by the connection loop.
#[derive(Debug)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    delay: Duration,
    last_logged: Option<(String, Instant)>,
}

impl ReconnectState {
    /// Start with no delay.
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            delay: Duration::ZERO,
            last_logged: None,
        }
    }

    /// Current delay before the next attempt.
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// A connection attempt failed; grow the delay and return it.
    pub fn on_failure(&mut self) -> Duration {
        self.delay = (self.delay + self.policy.step).min(self.policy.max);
        self.delay
    }

    /// A connection ended after being up for `connected_for`; return the delay
    /// before reconnecting.
    pub fn on_disconnect(&mut self, connected_for: Duration) -> Duration {
        if connected_for >= self.policy.healthy_reset {
            self.delay = Duration::ZERO;
            self.last_logged = None;
            self.delay
        } else {
            self.on_failure()
        }
    }

    /// Whether `error` should be logged now; repeated identical errors are
    /// suppressed within the cool-down window.
    pub fn should_log(&mut self, error: &str, now: Instant) -> bool {
        let suppress = self.last_logged.as_ref().is_some_and(|(last, at)| {
            last == error && now.duration_since(*at) < self.policy.error_log_cooldown
        });
        if !suppress {
            self.last_logged = Some((error.to_string(), now));
        }
        !suppress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            step: Duration::from_secs(10),
            max: Duration::from_secs(25),
            healthy_reset: Duration::from_secs(60),
            error_log_cooldown: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_delay_grows_by_step_to_cap() {
        let mut state = ReconnectState::new(policy());
        assert_eq!(state.delay(), Duration::ZERO);
        assert_eq!(state.on_failure(), Duration::from_secs(10));
        assert_eq!(state.on_failure(), Duration::from_secs(20));
        assert_eq!(state.on_failure(), Duration::from_secs(25));
        assert_eq!(state.on_failure(), Duration::from_secs(25));
    }

    #[test]
    fn test_healthy_connection_resets_delay() {
        let mut state = ReconnectState::new(policy());
        state.on_failure();
        state.on_failure();
        assert_eq!(state.on_disconnect(Duration::from_secs(61)), Duration::ZERO);
    }

    #[test]
    fn test_short_connection_counts_as_failure() {
        let mut state = ReconnectState::new(policy());
        state.on_failure();
        assert_eq!(state.on_disconnect(Duration::from_secs(5)), Duration::from_secs(20));
    }

    #[test]
    fn test_duplicate_errors_are_throttled() {
        let mut state = ReconnectState::new(policy());
        let t0 = Instant::now();
        assert!(state.should_log("refused", t0));
        assert!(!state.should_log("refused", t0 + Duration::from_secs(5)));
        assert!(state.should_log("reset", t0 + Duration::from_secs(6)));
        assert!(state.should_log("refused", t0 + Duration::from_secs(7)));
        assert!(!state.should_log("refused", t0 + Duration::from_secs(8)));
        assert!(state.should_log("refused", t0 + Duration::from_secs(40)));
    }
}
