//! Fetch layer settings.

use std::time::Duration;

use rand::Rng;

/// Default number of requests in flight at once.
const DEFAULT_CONCURRENCY: usize = 10;

/// Default number of additional attempts after the first failure.
const DEFAULT_RETRIES: u32 = 5;

/// Default per-request timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default first backoff delay in milliseconds.
const DEFAULT_BACKOFF_BASE_MS: u64 = 250;

/// Default backoff ceiling in milliseconds.
const DEFAULT_BACKOFF_MAX_MS: u64 = 8_000;

/// Default `User-Agent` header.
const DEFAULT_USER_AGENT: &str = concat!("catalog-sync/", env!("CARGO_PKG_VERSION"));

/// Retry budget and backoff curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first. Total attempts is `retries + 1`.
    pub retries: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling for any single delay, jitter included.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt - 1)` plus up to half of `base` of random jitter,
    /// capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let exponential = self.base.saturating_mul(factor);
        let half_base = self.base.checked_div(2).unwrap_or_default();
        let jitter_ceiling = u64::try_from(half_base.as_millis()).unwrap_or(0);
        let jitter = if jitter_ceiling == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ceiling))
        };
        exponential.saturating_add(jitter).min(self.max)
    }
}

/// Configuration for a [`crate::FetchClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Maximum requests in flight at once.
    pub concurrency: usize,
    /// Retry budget and backoff.
    pub retry: RetryPolicy,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl FetchConfig {
    /// Set the concurrency limit. Zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the number of additional attempts.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    /// Set the backoff curve.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry.base = base;
        self.retry.max = max;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        user_agent.clone_into(&mut self.user_agent);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_limits() {
        let config = FetchConfig::default();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.retry.retries, 5);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            retries: 5,
            base: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
        };
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let third = policy.delay_for(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(450));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        assert_eq!(FetchConfig::default().with_concurrency(0).concurrency, 1);
    }
}
