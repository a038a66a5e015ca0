//! Retry policy: decides whether a failed attempt is retried and how long to
//! wait before the next one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::JobError;

/// Exponential backoff with a ceiling.
///
/// `delay = base_delay_ms * 2^(attempts - 1)`, capped at `max_delay_ms`.
///
/// With the defaults (1s base, 10min cap):
/// - attempt 1: 1s
/// - attempt 2: 2s
/// - attempt 3: 4s
/// - attempt 11 and later: 10min
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 600_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Retry immediately, without backoff.
    pub fn immediate() -> Self {
        Self::new(0, 0)
    }

    /// Delay before the next attempt.
    ///
    /// `attempts` is the number of attempts made so far, counting the one
    /// that just failed, so the first retry passes `1`. `0` is treated as `1`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Whether a failed attempt gets another try.
    ///
    /// Every error is retried until the budget is spent, unless the worker
    /// marked it as permanent.
    pub fn should_retry(&self, attempts: u32, max_attempts: u32, error: &JobError) -> bool {
        error.retryable && attempts < max_attempts
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay_ms, 1_000);
        assert_eq!(policy.max_delay_ms, 600_000);
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy::new(2_000, 60_000);

        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn zero_attempts_uses_base_delay() {
        let policy = RetryPolicy::new(500, 10_000);
        assert_eq!(policy.next_delay(0), Duration::from_millis(500));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(1_000, 5_000);
        assert_eq!(policy.next_delay(4), Duration::from_secs(5));
        assert_eq!(policy.next_delay(200), Duration::from_secs(5));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn permanent_errors_are_never_retried() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1, 3, &JobError::retryable("timeout")));
        assert!(!policy.should_retry(3, 3, &JobError::retryable("timeout")));
        assert!(!policy.should_retry(1, 3, &JobError::permanent("bad payload")));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: backoff never shrinks as attempts grow and never exceeds the cap.
        #[test]
        fn backoff_is_monotonic_and_bounded(
            base in 0u64..10_000,
            extra in 0u64..10_000_000,
            attempts in 0u32..100,
        ) {
            let policy = RetryPolicy::new(base, base + extra);
            let current = policy.next_delay(attempts);
            let next = policy.next_delay(attempts + 1);

            prop_assert!(next >= current);
            prop_assert!(next <= Duration::from_millis(policy.max_delay_ms));
        }
    }
}
