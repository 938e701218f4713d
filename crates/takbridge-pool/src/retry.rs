//! Reconnect backoff
//!
//! A connection that has never delivered an event gets a small, bounded
//! number of retries with linearly growing delays. Once it has delivered
//! one, it is retried forever with the delay capped.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use takbridge_core::config::RetrySettings;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed before a never-opened connection is given up on
    pub max_initial_retries: u32,
    /// Delay added per consecutive failure
    pub step: Duration,
    /// Upper bound on the delay once a connection has opened
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_initial_retries: settings.max_initial_retries,
            step: settings.step(),
            max_delay: settings.max_delay(),
        }
    }
}

/// What to do after a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then reconnect
    Retry { attempt: u32, delay: Duration },
    /// Never opened and out of retries
    Stalled,
}

impl RetryPolicy {
    /// Records a failure on `state` and decides the next step.
    pub fn decide(&self, state: &RetryState) -> RetryDecision {
        let opened = state.has_opened();
        let count = state.retry_count();

        if !opened && count >= self.max_initial_retries {
            return RetryDecision::Stalled;
        }

        let attempt = state.count.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let delay = self.step.saturating_mul(attempt);
        let delay = if opened { delay.min(self.max_delay) } else { delay };

        RetryDecision::Retry { attempt, delay }
    }
}

/// Retry bookkeeping for one pool entry
#[derive(Debug, Default)]
pub struct RetryState {
    count: AtomicU32,
    opened: AtomicBool,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures since the last event
    pub fn retry_count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// True once the connection has delivered at least one event
    pub fn has_opened(&self) -> bool {
        self.opened.load(Ordering::Relaxed)
    }

    /// The connection delivered an event.
    pub fn record_open(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.opened.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(policy: &RetryPolicy, state: &RetryState, n: usize) -> Vec<Option<u64>> {
        (0..n)
            .map(|_| match policy.decide(state) {
                RetryDecision::Retry { delay, .. } => Some(delay.as_millis() as u64),
                RetryDecision::Stalled => None,
            })
            .collect()
    }

    #[test]
    fn test_never_opened_is_bounded() {
        let policy = RetryPolicy::default();
        let state = RetryState::new();

        assert_eq!(
            delays(&policy, &state, 7),
            vec![
                Some(1000),
                Some(2000),
                Some(3000),
                Some(4000),
                Some(5000),
                None,
                None
            ]
        );
        assert_eq!(state.retry_count(), 5);
    }

    #[test]
    fn test_opened_is_capped_and_unbounded() {
        let policy = RetryPolicy::default();
        let state = RetryState::new();
        state.record_open();

        let seen = delays(&policy, &state, 20);
        let expected: Vec<Option<u64>> = (1..=20u64).map(|n| Some((n * 1000).min(15000))).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_open_resets_count() {
        let policy = RetryPolicy::default();
        let state = RetryState::new();

        policy.decide(&state);
        policy.decide(&state);
        assert_eq!(state.retry_count(), 2);

        state.record_open();
        assert_eq!(state.retry_count(), 0);
        assert_eq!(
            policy.decide(&state),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_custom_policy() {
        let policy = RetryPolicy {
            max_initial_retries: 1,
            step: Duration::from_millis(250),
            max_delay: Duration::from_millis(500),
        };
        let state = RetryState::new();
        assert_eq!(delays(&policy, &state, 2), vec![Some(250), None]);
    }
}
