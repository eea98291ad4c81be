//! Retry state machine for outbound engine requests.
//!
//! A fresh [`RetryState`] is created for every request. Connectivity failures
//! double the delay up to a cap; throttling waits for the server hint (or the
//! current delay) without growing it.

use std::time::Duration;

/// Delay bounds for exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Per-request retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    policy: BackoffPolicy,
    attempt: u32,
    next_delay: Duration,
}

impl RetryState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            next_delay: policy.initial,
        }
    }

    /// Number of failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next connectivity failure will wait.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Record a connectivity failure and return how long to wait before retrying.
    pub fn on_connection_error(&mut self) -> Duration {
        self.attempt += 1;
        let wait = self.next_delay;
        self.next_delay = self.next_delay.saturating_mul(2).min(self.policy.max);
        wait
    }

    /// Record a throttling response and return how long to wait.
    ///
    /// The backoff delay is left untouched.
    pub fn on_throttled(&mut self, retry_after: Option<Duration>) -> Duration {
        self.attempt += 1;
        retry_after.unwrap_or(self.next_delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = self.policy.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn connection_errors_double_until_cap() {
        let mut state = RetryState::new(BackoffPolicy::default());
        let waits: Vec<Duration> = (0..8).map(|_| state.on_connection_error()).collect();
        assert_eq!(
            waits,
            vec![
                secs(1),
                secs(2),
                secs(4),
                secs(8),
                secs(16),
                secs(32),
                secs(60),
                secs(60)
            ]
        );
        assert_eq!(state.attempt(), 8);
    }

    #[test]
    fn throttle_uses_hint_without_growing_delay() {
        let mut state = RetryState::new(BackoffPolicy::default());
        state.on_connection_error();
        assert_eq!(state.next_delay(), secs(2));

        assert_eq!(state.on_throttled(Some(secs(2))), secs(2));
        assert_eq!(state.next_delay(), secs(2));

        assert_eq!(state.on_throttled(None), secs(2));
        assert_eq!(state.next_delay(), secs(2));
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut state = RetryState::new(BackoffPolicy::default());
        state.on_connection_error();
        state.on_connection_error();
        state.reset();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.on_connection_error(), secs(1));
    }
}
