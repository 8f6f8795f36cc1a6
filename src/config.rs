//! Engine configuration.
//!
//! One [`EngineConfig`] describes a target service: retry budget, backoff
//! shape, token-bucket rate, connection-pool bounds and timeouts. The
//! executor projects it into per-component configurations at construction
//! time, so the components stay injectable and free of hidden globals.

use std::time::Duration;

use crate::error::{ConfigValidationError, ValidationResult};
use crate::rate_limiter::RateLimiterConfig;
use crate::retry_policy::RetryConfig;

/// Proxy configuration for the underlying transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy URL (e.g. "http://127.0.0.1:8080").
    pub url: String,
    /// Optional username for proxy authentication.
    pub username: Option<String>,
    /// Optional password for proxy authentication.
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Creates a proxy configuration with just a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// Sets credentials for the proxy.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Configuration consumed by [`RequestExecutor`](crate::executor::RequestExecutor)
/// at construction time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of network attempts per logical request.
    pub max_attempts: u32,
    /// Base backoff delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay before jitter.
    pub max_delay: Duration,
    /// Jitter band applied to each delay: a factor drawn uniformly from
    /// `1 - jitter ..= 1 + jitter`. `0.0` disables jitter.
    pub jitter: f64,
    /// Whether transient failures on non-idempotent requests are retried
    /// even when the request may already have reached the server. This is
    /// a policy choice, not a guarantee of server-side idempotency.
    pub retry_non_idempotent: bool,
    /// Token-bucket capacity.
    pub rate_capacity: u32,
    /// Token-bucket refill rate in tokens per second.
    pub rate_refill_per_second: f64,
    /// Tokens consumed per network attempt.
    pub cost_per_request: u32,
    /// Maximum concurrent connections per host.
    pub max_connections_per_host: usize,
    /// How long an attempt may wait for a free connection slot before
    /// failing with `PoolExhausted`.
    pub pool_acquire_timeout: Duration,
    /// How long an idle pooled connection is kept alive for reuse.
    pub pool_idle_timeout: Duration,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Deadline applied to logical requests that do not carry their own.
    pub default_timeout: Duration,
    /// `User-Agent` header value for outbound requests.
    pub user_agent: String,
    /// Optional proxy for the underlying transport.
    pub proxy: Option<ProxyConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: 0.5,
            retry_non_idempotent: true,
            rate_capacity: 10,
            rate_refill_per_second: 10.0,
            cost_per_request: 1,
            max_connections_per_host: 5,
            pool_acquire_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            default_timeout: Duration::from_secs(30),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
                .to_string(),
            proxy: None,
        }
    }
}

impl EngineConfig {
    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff shape.
    #[must_use]
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Sets the jitter band.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets whether non-idempotent requests retry ambiguous transient
    /// failures.
    #[must_use]
    pub fn with_retry_non_idempotent(mut self, retry: bool) -> Self {
        self.retry_non_idempotent = retry;
        self
    }

    /// Sets the token-bucket shape.
    #[must_use]
    pub fn with_rate_limit(mut self, capacity: u32, refill_per_second: f64) -> Self {
        self.rate_capacity = capacity;
        self.rate_refill_per_second = refill_per_second;
        self
    }

    /// Sets the per-host connection bound.
    #[must_use]
    pub fn with_max_connections_per_host(mut self, max: usize) -> Self {
        self.max_connections_per_host = max;
        self
    }

    /// Sets the default per-request deadline.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the proxy configuration.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Validates the configuration.
    ///
    /// Returns warnings for valid but suspicious settings; rejects values
    /// that would make the engine misbehave outright.
    pub fn validate(&self) -> Result<ValidationResult, ConfigValidationError> {
        if self.max_attempts < 1 {
            return Err(ConfigValidationError::too_low("max_attempts", self.max_attempts, 1));
        }
        if self.max_attempts > 10 {
            return Err(ConfigValidationError::too_high("max_attempts", self.max_attempts, 10));
        }
        if self.base_delay < Duration::from_millis(10) {
            return Err(ConfigValidationError::too_low(
                "base_delay_ms",
                self.base_delay.as_millis(),
                10,
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigValidationError::too_low(
                "max_delay_ms",
                self.max_delay.as_millis(),
                self.base_delay.as_millis(),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigValidationError::too_high("jitter", self.jitter, "0.99"));
        }
        if self.rate_capacity < 1 {
            return Err(ConfigValidationError::too_low("rate_capacity", self.rate_capacity, 1));
        }
        if self.rate_refill_per_second <= 0.0 {
            return Err(ConfigValidationError::too_low(
                "rate_refill_per_second",
                self.rate_refill_per_second,
                "positive",
            ));
        }
        if self.cost_per_request < 1 {
            return Err(ConfigValidationError::too_low("cost_per_request", self.cost_per_request, 1));
        }
        if self.cost_per_request > self.rate_capacity {
            return Err(ConfigValidationError::too_high(
                "cost_per_request",
                self.cost_per_request,
                self.rate_capacity,
            ));
        }
        if self.max_connections_per_host < 1 {
            return Err(ConfigValidationError::too_low(
                "max_connections_per_host",
                self.max_connections_per_host,
                1,
            ));
        }

        let mut warnings = Vec::new();
        if self.max_delay > self.default_timeout {
            warnings.push(format!(
                "max_delay ({}ms) exceeds default_timeout ({}ms); later retries may never fire",
                self.max_delay.as_millis(),
                self.default_timeout.as_millis()
            ));
        }
        Ok(ValidationResult::with_warnings(warnings))
    }

    /// Projects the rate-limiter portion of this configuration.
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.rate_capacity, self.rate_refill_per_second)
            .with_cost_per_request(self.cost_per_request)
    }

    /// Projects the retry-policy portion of this configuration.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
            retry_non_idempotent: self.retry_non_idempotent,
        }
    }

    /// Projects the connection-pool portion of this configuration.
    pub fn pool_config(&self) -> crate::connection_pool::ConnectionPoolConfig {
        crate::connection_pool::ConnectionPoolConfig {
            max_per_host: self.max_connections_per_host,
            acquire_timeout: self.pool_acquire_timeout,
            idle_timeout: self.pool_idle_timeout,
            connect_timeout: self.connect_timeout,
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let result = EngineConfig::default().validate();
        assert!(result.is_ok());
        assert!(result.unwrap().warnings.is_empty());
    }

    #[test]
    fn builder_chain() {
        let config = EngineConfig::default()
            .with_max_attempts(5)
            .with_backoff(Duration::from_millis(200), Duration::from_secs(5))
            .with_jitter(0.0)
            .with_rate_limit(50, 25.0)
            .with_max_connections_per_host(8)
            .with_default_timeout(Duration::from_secs(10));

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(200));
        assert_eq!(config.rate_capacity, 50);
        assert_eq!(config.max_connections_per_host, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_attempts() {
        let config = EngineConfig::default().with_max_attempts(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field_name(), "max_attempts");
    }

    #[test]
    fn rejects_excessive_attempts() {
        let config = EngineConfig::default().with_max_attempts(11);
        assert!(config.validate().is_err());
        let config = EngineConfig::default().with_max_attempts(10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_tiny_base_delay() {
        let config = EngineConfig::default().with_backoff(
            Duration::from_millis(5),
            Duration::from_secs(1),
        );
        let err = config.validate().unwrap_err();
        assert_eq!(err.field_name(), "base_delay_ms");
    }

    #[test]
    fn rejects_cap_below_base() {
        let config = EngineConfig::default().with_backoff(
            Duration::from_millis(500),
            Duration::from_millis(100),
        );
        let err = config.validate().unwrap_err();
        assert_eq!(err.field_name(), "max_delay_ms");
    }

    #[test]
    fn rejects_cost_above_capacity() {
        let mut config = EngineConfig::default().with_rate_limit(2, 1.0);
        config.cost_per_request = 3;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field_name(), "cost_per_request");
    }

    #[test]
    fn rejects_nonpositive_refill() {
        let config = EngineConfig::default().with_rate_limit(10, 0.0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field_name(), "rate_refill_per_second");
    }

    #[test]
    fn warns_when_backoff_outlives_deadline() {
        let config = EngineConfig::default()
            .with_backoff(Duration::from_millis(100), Duration::from_secs(60))
            .with_default_timeout(Duration::from_secs(30));
        let result = config.validate().unwrap();
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn proxy_with_credentials() {
        let proxy = ProxyConfig::new("http://localhost:8080").with_credentials("user", "pass");
        assert_eq!(proxy.username.as_deref(), Some("user"));
        assert_eq!(proxy.password.as_deref(), Some("pass"));
    }
}
