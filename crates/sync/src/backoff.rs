//! Retry backoff and regulator rate-limit arithmetic.
//!
//! Pure functions of their inputs, so the dispatcher's pacing can be tested
//! without any IO.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for failed queue items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of failed attempts before an item is failed permanently.
    pub max_retries: u32,
    /// Delay unit multiplied by `2^retry_count`.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0); only ever lengthens a delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60 * 60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Exponential policy without jitter.
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// `min(max_delay, base_delay * 2^retry_count)`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi(retry_count.min(i32::MAX as u32) as i32);
        Duration::from_millis((base_ms * exp).min(max_ms) as u64)
    }

    /// Backoff with jitter drawn from `sample` in `[0, 1)`.
    ///
    /// Jitter is applied before the cap, and is at most `jitter` (<= 100%) of
    /// the raw delay. Since the raw delay doubles per retry, consecutive delays
    /// stay non-decreasing for any pair of samples.
    pub fn delay_with_sample(&self, retry_count: u32, sample: f64) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi(retry_count.min(i32::MAX as u32) as i32);
        let raw = base_ms * exp;
        let factor = 1.0 + self.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 0.999_999);
        Duration::from_millis((raw * factor).min(max_ms) as u64)
    }

    /// Delay before the next attempt after `retry_count` failures.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        if self.jitter <= 0.0 {
            return self.backoff_delay(retry_count);
        }
        let sample: f64 = rand::thread_rng().r#gen();
        self.delay_with_sample(retry_count, sample)
    }

    /// Check if more retries are allowed after `retry_count` failures.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Minimum spacing between two regulator calls for one license.
///
/// `60_000 / rate_limit_per_minute` milliseconds; a zero limit is treated as
/// one call per minute rather than unbounded.
pub fn inter_call_delay(rate_limit_per_minute: u32) -> Duration {
    Duration::from_millis(60_000 / u64::from(rate_limit_per_minute.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_secs(10))
    }

    #[test]
    fn exponential_backoff_doubles_per_retry() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(7), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_only_lengthens() {
        let policy = policy().with_jitter(0.5);
        assert_eq!(policy.delay_with_sample(2, 0.0), Duration::from_millis(400));
        assert_eq!(policy.delay_with_sample(2, 0.5), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn sixty_per_minute_is_one_second_apart() {
        assert_eq!(inter_call_delay(60), Duration::from_millis(1000));
        assert_eq!(inter_call_delay(50), Duration::from_millis(1200));
        assert_eq!(inter_call_delay(0), Duration::from_secs(60));
    }

    proptest! {
        /// Property: backoff never decreases across consecutive failures,
        /// whatever jitter samples are drawn.
        #[test]
        fn backoff_is_monotonic(
            retry in 0u32..40,
            jitter in 0.0f64..=1.0,
            a in 0.0f64..1.0,
            b in 0.0f64..1.0,
        ) {
            let policy = policy().with_jitter(jitter);
            let current = policy.delay_with_sample(retry, a);
            let next = policy.delay_with_sample(retry + 1, b);
            prop_assert!(next >= current, "{:?} then {:?}", current, next);
            prop_assert!(next <= policy.max_delay);
        }
    }
}
