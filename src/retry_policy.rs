//! Retry decisions.
//!
//! [`RetryPolicy`] is a pure decision component: given the state of a
//! logical request after a failed attempt, it either names the delay
//! before the next attempt or stops the loop. It holds no shared state
//! and performs no waiting itself; the executor owns the loop.
//!
//! Backoff is exponential with jitter:
//! `min(base_delay * 2^(attempt-1), max_delay)` scaled by a factor drawn
//! uniformly from `1 - jitter ..= 1 + jitter`.

use std::time::Duration;

use rand::Rng;

use crate::error::FailureClass;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of network attempts per logical request.
    pub max_attempts: u32,
    /// Backoff delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay before jitter.
    pub max_delay: Duration,
    /// Jitter band: each delay is scaled by a uniform factor from
    /// `1 - jitter ..= 1 + jitter`. `0.0` disables jitter.
    pub jitter: f64,
    /// Whether transient failures that may already have reached the
    /// server are retried for non-idempotent requests.
    ///
    /// When enabled (the default), a received-and-transient response
    /// such as a 503 is retried for all methods on the assumption that
    /// no side effect completed. That is a policy choice, not a
    /// guarantee: servers without idempotency keys may observe duplicate
    /// effects. When disabled, non-idempotent requests retry only
    /// failures guaranteed to precede any byte being sent (connection
    /// refused).
    pub retry_non_idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: 0.5,
            retry_non_idempotent: true,
        }
    }
}

/// State of one logical request after a failed attempt, assembled by the
/// executor for each policy consultation and discarded on completion.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Number of network attempts performed so far (1-based).
    pub attempt: u32,
    /// Wall-clock time since the logical request started.
    pub elapsed: Duration,
    /// Wall-clock time left until the request deadline.
    pub remaining: Duration,
    /// Classification of the failure that ended the attempt.
    pub classification: FailureClass,
    /// Whether the request was marked idempotent by the caller.
    pub idempotent: bool,
    /// Server-provided `Retry-After` hint, honored as a delay floor.
    pub retry_after: Option<Duration>,
}

/// Outcome of a policy consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then attempt again.
    RetryAfter(Duration),
    /// Stop; surface the failure.
    Stop,
}

/// Pure retry decision function over [`RetryContext`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a retry policy with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns a reference to the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decides whether the request should be attempted again.
    ///
    /// Only transient failures are retried; the attempt budget and the
    /// request deadline both bound the loop. A delay that would not
    /// leave room for another attempt before the deadline stops the loop
    /// early instead of sleeping into certain failure.
    pub fn decide(&self, ctx: &RetryContext) -> RetryDecision {
        if !ctx.classification.is_transient() {
            return RetryDecision::Stop;
        }
        if ctx.attempt >= self.config.max_attempts {
            return RetryDecision::Stop;
        }
        if !ctx.idempotent
            && !self.config.retry_non_idempotent
            && !ctx.classification.precedes_send()
        {
            return RetryDecision::Stop;
        }

        let mut delay = self.backoff_delay(ctx.attempt);
        if let Some(floor) = ctx.retry_after {
            delay = delay.max(floor);
        }
        if delay >= ctx.remaining {
            return RetryDecision::Stop;
        }
        RetryDecision::RetryAfter(delay)
    }

    /// Computes the jittered exponential delay after the given attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay.as_millis() as u64;
        let max_ms = self.config.max_delay.as_millis() as u64;
        let exponent = attempt.saturating_sub(1).min(20);
        let capped = base_ms.saturating_mul(1 << exponent).min(max_ms);

        if self.config.jitter <= 0.0 {
            return Duration::from_millis(capped);
        }
        let factor = rand::rng()
            .random_range((1.0 - self.config.jitter)..=(1.0 + self.config.jitter));
        Duration::from_millis((capped as f64 * factor).round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
