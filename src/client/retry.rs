//! Retry policy for the request pipeline

use std::time::Duration;

use crate::config::ClientConfig;
use crate::types::ClientError;

/// Backoff parameters, derived from [`ClientConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub rate_limit_base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            rate_limit_base_delay: config.rate_limit_base_delay,
            max_delay: config.max_retry_delay,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_secs(1),
            rate_limit_base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
        }
    }

    /// `base × 2^(attempt−1)`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32, error: &ClientError) -> Duration {
        let base = match error {
            ClientError::RateLimited { .. } => self.rate_limit_base_delay,
            _ => self.base_delay,
        };
        let exponent = attempt.saturating_sub(1).min(16);
        let computed = base.saturating_mul(1u32 << exponent).min(self.max_delay);

        match error {
            ClientError::RateLimited {
                retry_after: Some(after),
                ..
            } => computed.max((*after).min(self.max_delay)),
            _ => computed,
        }
    }
}

/// Per-request retry bookkeeping
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    scheduled: bool,
    last_delay: Option<Duration>,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            scheduled: false,
            last_delay: None,
        }
    }

    /// Decide whether `error` earns another attempt.
    ///
    /// Returns the delay to wait, or `None` when the error must be surfaced.
    /// A retry that is already scheduled must be consumed with
    /// [`RetryState::begin_attempt`] before another can be scheduled.
    pub fn schedule(&mut self, error: &ClientError) -> Option<Duration> {
        if self.scheduled || !error.is_retryable() || self.attempt >= self.policy.max_retries {
            return None;
        }

        self.attempt += 1;
        self.scheduled = true;
        let delay = self.policy.delay_for(self.attempt, error);
        self.last_delay = Some(delay);
        Some(delay)
    }

    /// Mark the scheduled retry as dispatched
    pub fn begin_attempt(&mut self) {
        self.scheduled = false;
    }

    /// Retries performed so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }
}
