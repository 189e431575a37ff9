//! Rate-limit aware retry for single remote calls

use std::{future::Future, time::Duration};

use backon::{BackoffBuilder, Retryable};
use rand::Rng;
use remote::RemoteError;
use tracing::warn;

use super::config::SyncConfig;

/// Retries a call only while it keeps failing with [`RemoteError::RateLimited`]
///
/// Holds no state between calls; every [`RetryPolicy::run`] starts its own
/// attempt counter and back-off schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_jitter: Duration,
}

impl RetryPolicy {
    /// `max_retries` counts total invocations and is raised to at least one
    pub fn new(max_retries: u32, base_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            max_jitter,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.max_retries,
            config.base_retry_delay(),
            config.max_jitter(),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn backoff(&self) -> RateLimitBackoff {
        RateLimitBackoff {
            base: self.base_delay,
            max_jitter: self.max_jitter,
            retries: self.max_retries - 1,
        }
    }

    /// Delays slept before attempts `2..=max_retries`
    pub fn delays(&self) -> RateLimitDelays {
        self.backoff().build()
    }

    /// Run `op`, sleeping `base * 2^attempt + jitter` after each rate-limited
    /// failure. Any other error is returned immediately
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1u32;
        let max_retries = self.max_retries;
        op.retry(self.backoff())
            .when(RemoteError::is_rate_limited)
            .notify(|err: &RemoteError, delay: Duration| {
                warn!(
                    operation = label,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Remote call rate limited, backing off"
                );
                attempt += 1;
            })
            .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitBackoff {
    base: Duration,
    max_jitter: Duration,
    retries: u32,
}

impl BackoffBuilder for RateLimitBackoff {
    type Backoff = RateLimitDelays;

    fn build(self) -> Self::Backoff {
        RateLimitDelays {
            base: self.base,
            max_jitter: self.max_jitter,
            attempt: 0,
            remaining: self.retries,
        }
    }
}

/// Exponential delay schedule with additive jitter
#[derive(Debug, Clone)]
pub struct RateLimitDelays {
    base: Duration,
    max_jitter: Duration,
    attempt: u32,
    remaining: u32,
}

impl RateLimitDelays {
    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl Iterator for RateLimitDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor).saturating_add(self.jitter()))
    }
}
