//! Request execution engine for REST-style HTTP API clients.
//!
//! This crate is the base layer API-specific client code ("plugins")
//! builds on: it delivers logical requests to a remote service while
//! enforcing a token-bucket rate limit, bounding per-host concurrency,
//! recovering from transient failures with jittered exponential backoff,
//! and normalizing JSON, XML and form-encoded response bodies into one
//! canonical shape.
//!
//! # Components
//!
//! - [`RateLimiter`](rate_limiter::RateLimiter) — token bucket with FIFO
//!   fairness, lazy refill, cancellable acquisition
//! - [`RetryPolicy`](retry_policy::RetryPolicy) — pure retry decision
//!   with exponential backoff and jitter
//! - [`ConnectionPool`](connection_pool::ConnectionPool) — bounded
//!   per-host connection slots over a reusable transport
//! - [`normalizer`] — content-type-driven decoding into
//!   [`CanonicalBody`](normalizer::CanonicalBody)
//! - [`RequestExecutor`](executor::RequestExecutor) — the orchestrator
//!   and sole retry decider
//!
//! # Example
//!
//! ```rust,no_run
//! use restbase::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<()> {
//! let config = EngineConfig::default()
//!     .with_rate_limit(20, 10.0)
//!     .with_max_attempts(3)
//!     .with_default_timeout(Duration::from_secs(10));
//! let executor = RequestExecutor::new(config)?;
//!
//! let response = executor
//!     .execute(Request::get("https://api.example.com/v1/items"))
//!     .await?;
//! println!("fetched in {} attempt(s)", response.attempts);
//! # Ok(())
//! # }
//! ```
//!
//! Authentication, URL templating and pagination belong to the plugin
//! layer above; this crate only moves bytes reliably.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection_pool;
pub mod error;
pub mod executor;
pub mod logging;
pub mod normalizer;
pub mod rate_limiter;
pub mod request;
pub mod retry_policy;

pub use config::{EngineConfig, ProxyConfig};
pub use connection_pool::{ConnectionPool, ConnectionPoolConfig, PooledConnection};
pub use error::{
    ContextExt, DecodeError, Error, FailureClass, FatalKind, NetworkError, Result, TransientKind,
};
pub use executor::RequestExecutor;
pub use normalizer::{CanonicalBody, XmlElement};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use request::{Request, RequestBody, Response};
pub use retry_policy::{RetryConfig, RetryContext, RetryDecision, RetryPolicy};

/// Prelude for convenient imports.
///
/// ```rust
/// use restbase::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{EngineConfig, ProxyConfig};
    pub use crate::connection_pool::{ConnectionPool, ConnectionPoolConfig};
    pub use crate::error::{ContextExt, Error, FailureClass, Result};
    pub use crate::executor::RequestExecutor;
    pub use crate::logging::{LogConfig, LogFormat, LogLevel, init_logging, try_init_logging};
    pub use crate::normalizer::{CanonicalBody, XmlElement};
    pub use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
    pub use crate::request::{Request, RequestBody, Response};
    pub use crate::retry_policy::{RetryConfig, RetryPolicy};
    pub use reqwest::{Method, StatusCode, header::HeaderMap};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_metadata() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "restbase");
    }
}
