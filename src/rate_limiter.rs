//! Token-bucket rate limiting.
//!
//! The bucket holds up to `capacity` tokens and refills continuously at
//! `refill_per_second`. Refill is computed lazily from elapsed time at
//! each acquisition attempt; there is no background timer task.
//!
//! Waiters are served first-come-first-served: [`RateLimiter::acquire`]
//! takes its turn on an internal queue (a tokio mutex, which wakes
//! waiters in FIFO order) before polling the bucket, so a late arrival
//! can never starve an earlier one. Cancelling or timing out a pending
//! acquisition consumes no tokens — consumption happens atomically under
//! the state lock in the final successful poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::error::{Error, Result};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum number of tokens the bucket can hold.
    pub capacity: u32,
    /// Continuous refill rate in tokens per second.
    pub refill_per_second: f64,
    /// Tokens consumed per request (defaults to 1).
    pub cost_per_request: u32,
}

impl RateLimiterConfig {
    /// Creates a configuration allowing bursts of `capacity` requests,
    /// refilled at `refill_per_second` tokens each second.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            cost_per_request: 1,
        }
    }

    /// Sets a custom token cost per request.
    #[must_use]
    pub fn with_cost_per_request(mut self, cost: u32) -> Self {
        self.cost_per_request = cost;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        // 10 requests per second
        Self::new(10, 10.0)
    }
}

/// Internal bucket state, mutated only under the state lock.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    refill_per_second: f64,
    capacity: f64,
}

impl BucketState {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            last_refill: Instant::now(),
            refill_per_second: config.refill_per_second.max(f64::MIN_POSITIVE),
            capacity: f64::from(config.capacity),
        }
    }

    /// Credits tokens for the time elapsed since the last refill,
    /// saturating at capacity.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn try_consume(&mut self, cost: u32) -> bool {
        self.refill();
        let cost = f64::from(cost);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Time until `cost` tokens will have accrued.
    fn wait_time(&self, cost: u32) -> Duration {
        let deficit = f64::from(cost) - self.tokens;
        if deficit <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(deficit / self.refill_per_second)
    }
}

/// Token-bucket rate limiter shared across concurrent tasks.
///
/// Cloning is cheap; clones share the same bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// FIFO turn-taking for waiters; held across the refill sleep.
    queue: Arc<Mutex<()>>,
    /// Bucket state; held only for short, non-suspending sections.
    state: Arc<Mutex<BucketState>>,
    capacity: u32,
    cost_per_request: u32,
}

impl RateLimiter {
    /// Creates a rate limiter with the given configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            queue: Arc::new(Mutex::new(())),
            state: Arc::new(Mutex::new(BucketState::new(&config))),
            capacity: config.capacity,
            cost_per_request: config.cost_per_request,
        }
    }

    /// The configured bucket capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The configured token cost per request.
    pub fn cost_per_request(&self) -> u32 {
        self.cost_per_request
    }

    /// Waits until `cost` tokens are available and consumes them.
    ///
    /// Suspends the calling task only; other tasks keep running. Waiters
    /// are granted tokens in arrival order. Dropping the returned future
    /// before completion consumes nothing.
    ///
    /// # Errors
    ///
    /// Rejects a cost above the bucket capacity, which could never be
    /// satisfied.
    pub async fn acquire(&self, cost: u32) -> Result<()> {
        if cost > self.capacity {
            return Err(Error::invalid_request(format!(
                "token cost {cost} exceeds bucket capacity {}",
                self.capacity
            )));
        }

        let _turn = self.queue.lock().await;
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                if state.try_consume(cost) {
                    return Ok(());
                }
                state.wait_time(cost)
            };
            sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up after `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimitTimeout`] if the tokens did not accrue
    /// in time; no tokens are consumed in that case.
    pub async fn acquire_timeout(&self, cost: u32, limit: Duration) -> Result<()> {
        match tokio::time::timeout(limit, self.acquire(cost)).await {
            Ok(result) => result,
            Err(_) => Err(Error::rate_limit_timeout(format!(
                "no {cost} token(s) became available within {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Consumes one request's worth of tokens without waiting.
    ///
    /// Returns `false` when the bucket cannot cover the cost right now.
    pub async fn try_acquire(&self) -> bool {
        self.try_acquire_with_cost(self.cost_per_request).await
    }

    /// Consumes `cost` tokens without waiting, if available.
    pub async fn try_acquire_with_cost(&self, cost: u32) -> bool {
        let mut state = self.state.lock().await;
        state.try_consume(cost)
    }

    /// Current token balance after a lazy refill.
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill();
        state.tokens
    }

    /// Restores the bucket to full capacity.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.tokens = state.capacity;
        state.last_refill = Instant::now();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.cost_per_request, 1);
    }

    #[tokio::test]
    async fn burst_up_to_capacity() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(5, 1.0));

        for _ in 0..5 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(2, 10.0));

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        // 10 tokens/s: one token accrues every 100ms.
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_saturates_at_capacity() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(3, 100.0));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((limiter.available_tokens().await - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, 10.0));

        limiter.acquire(1).await.unwrap();
        let start = Instant::now();
        limiter.acquire(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_timeout_consumes_nothing() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(2, 1.0));

        limiter.acquire(2).await.unwrap();
        let before = limiter.available_tokens().await;

        let err = limiter
            .acquire_timeout(2, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimitTimeout(_)));

        // The timed-out waiter must not have taken partial credit.
        let after = limiter.available_tokens().await;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn oversized_cost_is_rejected() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(3, 1.0));
        let err = limiter.acquire(4).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_arrival_order() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, 10.0));
        limiter.acquire(1).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for id in 0..4u32 {
            let limiter = limiter.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                limiter.acquire(1).await.unwrap();
                tx.send(id).unwrap();
            });
            // Let this waiter reach the queue before spawning the next.
            tokio::time::advance(Duration::from_millis(1)).await;
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(id) = rx.recv().await {
            order.push(id);
        }
        assert_eq!(order, [0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn concurrent_acquirers_drain_exactly_capacity() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(10, 1000.0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn reset_restores_full_capacity() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(4, 0.5));
        for _ in 0..4 {
            limiter.acquire(1).await.unwrap();
        }
        assert!(limiter.available_tokens().await < 1.0);

        limiter.reset().await;
        assert!((limiter.available_tokens().await - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_cost_consumes_proportionally() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(10, 1.0).with_cost_per_request(5));

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire_with_cost(3).await);
        assert!(!limiter.try_acquire_with_cost(3).await);
        assert!((limiter.available_tokens().await - 2.0).abs() < 1e-9);
    }
}
