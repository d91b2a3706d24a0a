//! Bounded exponential backoff for session establishment

use std::time::Duration;

use vc_core::config::BackoffConfig;

/// Delay schedule with jitter and a hard cap on attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    current: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    remaining: u32,
}

impl RetryPolicy {
    /// Build a policy from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            config.initial,
            config.max,
            config.multiplier,
            config.jitter,
            config.max_attempts,
        )
    }

    /// Build a policy with explicit parameters. `max_attempts` counts the
    /// first try and is clamped to at least one.
    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
            remaining: max_attempts.max(1),
        }
    }

    /// Consume one attempt. Returns false once the budget is spent.
    pub fn begin_attempt(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// Whether another attempt is allowed after the current one
    pub fn has_remaining(&self) -> bool {
        self.remaining > 0
    }

    /// Delay before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(4),
            2.0,
            0.0,
            attempts,
        )
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let mut p = policy(5);
        assert_eq!(p.next_delay(), Duration::from_secs(1));
        assert_eq!(p.next_delay(), Duration::from_secs(2));
        assert_eq!(p.next_delay(), Duration::from_secs(4));
        assert_eq!(p.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn test_attempt_budget() {
        let mut p = policy(2);
        assert!(p.begin_attempt());
        assert!(p.has_remaining());
        assert!(p.begin_attempt());
        assert!(!p.has_remaining());
        assert!(!p.begin_attempt());
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let mut p = policy(0);
        assert!(p.begin_attempt());
        assert!(!p.begin_attempt());
    }

    #[test]
    fn test_jitter_bounded() {
        let mut p = RetryPolicy::new(
            Duration::from_secs(2),
            Duration::from_secs(8),
            2.0,
            0.5,
            3,
        );
        let d = p.next_delay();
        assert!(d >= Duration::from_secs(2));
        assert!(d <= Duration::from_secs(3));
    }
}
