//! Request execution.
//!
//! [`RequestExecutor`] turns logical requests into network attempts under
//! rate-limit, concurrency and retry constraints. Per attempt it walks an
//! explicit sequence — acquire a rate-limit token, acquire a connection
//! slot, send, decode, classify — and consults the
//! [`RetryPolicy`](crate::retry_policy::RetryPolicy) after every failure.
//! It is the only component that retries; everything below it raises a
//! typed failure exactly once.
//!
//! Many logical requests may run concurrently against one executor; the
//! shared rate limiter and connection pool are the only cross-request
//! state, and neither is locked across network I/O. Within one logical
//! request, attempts are strictly sequential. Backoff sleeps hold no
//! token, slot or lock.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, instrument, warn};

use crate::config::EngineConfig;
use crate::connection_pool::ConnectionPool;
use crate::error::{Error, FailureClass, NetworkError, Result};
use crate::normalizer;
use crate::rate_limiter::RateLimiter;
use crate::request::{Request, Response};
use crate::retry_policy::{RetryContext, RetryDecision, RetryPolicy};

/// An undecoded attempt result.
#[derive(Debug)]
struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl RawResponse {
    fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE)?.to_str().ok()
    }
}

/// Executes logical requests against a remote service.
///
/// Holds one [`RateLimiter`] and one [`ConnectionPool`] for its target;
/// both are explicit instances whose lifecycle is tied to the executor,
/// never process globals. Construct one executor per target service and
/// share it (behind an `Arc`) across tasks.
#[derive(Debug)]
pub struct RequestExecutor {
    config: EngineConfig,
    rate_limiter: RateLimiter,
    pool: ConnectionPool,
    retry_policy: RetryPolicy,
}

impl RequestExecutor {
    /// Creates an executor from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is out of range or the
    /// transport cannot be built.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let validation = config.validate()?;
        for warning in &validation.warnings {
            warn!(%warning, "engine configuration warning");
        }

        let rate_limiter = RateLimiter::new(config.rate_limiter_config());
        let pool = ConnectionPool::new(config.pool_config())?;
        let retry_policy = RetryPolicy::new(config.retry_config());

        Ok(Self {
            config,
            rate_limiter,
            pool,
            retry_policy,
        })
    }

    /// Creates an executor from externally constructed components,
    /// allowing a rate limiter or pool to be shared between executors.
    pub fn with_components(
        config: EngineConfig,
        rate_limiter: RateLimiter,
        pool: ConnectionPool,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            config,
            rate_limiter,
            pool,
            retry_policy,
        }
    }

    /// Returns a reference to the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns a reference to the shared rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Returns a reference to the shared connection pool.
    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Executes one logical request to completion.
    ///
    /// Returns the normalized response of the first successful attempt,
    /// or exactly one terminal error: the classified failure itself when
    /// it was fatal, [`Error::RetriesExhausted`] when transient failures
    /// outlasted the budget, or [`Error::DeadlineExceeded`] when the
    /// wall clock ran out at any suspension point.
    #[instrument(
        name = "execute_request",
        skip(self, request),
        fields(method = %request.method, url = %request.url)
    )]
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let host = pool_key(&request.url)?;
        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        let cost = self.config.cost_per_request;
        let mut attempt: u32 = 0;

        loop {
            // One token per attempt that reaches the network; a request
            // that dies here has contacted nothing and consumed nothing.
            let budget = remaining_budget(deadline)?;
            if let Err(err) = self.rate_limiter.acquire_timeout(cost, budget).await {
                return Err(match err {
                    Error::RateLimitTimeout(_) => Error::deadline_exceeded(
                        "deadline expired waiting for a rate-limit token",
                    ),
                    other => other,
                });
            }
            attempt += 1;

            let outcome = self.dispatch(&host, &request, deadline).await;

            let (classification, failure, retry_after) = match outcome {
                Ok(raw) if raw.status.is_success() => {
                    let content_type = raw.content_type().map(str::to_owned);
                    let body = normalizer::normalize(&raw.body, content_type.as_deref())?;
                    debug!(status = raw.status.as_u16(), attempt, "request succeeded");
                    return Ok(Response {
                        status: raw.status,
                        headers: raw.headers,
                        body,
                        attempts: attempt,
                    });
                }
                Ok(raw) => {
                    let retry_after = retry_after_hint(&raw.headers);
                    let content_type = raw.content_type().map(str::to_owned);
                    let body = normalizer::normalize_lenient(&raw.body, content_type.as_deref());
                    let classification = FailureClass::from_status(raw.status.as_u16());
                    (
                        classification,
                        Error::http(raw.status.as_u16(), body),
                        retry_after,
                    )
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(Error::deadline_exceeded(format!(
                            "request exceeded its {}ms budget",
                            timeout.as_millis()
                        )));
                    }
                    match err.classification() {
                        Some(classification) => (classification, err, None),
                        // Pool exhaustion and other unclassified
                        // failures are terminal conditions of the
                        // engine, not attempt failures.
                        None => return Err(err),
                    }
                }
            };

            let ctx = RetryContext {
                attempt,
                elapsed: started.elapsed(),
                remaining: deadline.saturating_duration_since(Instant::now()),
                classification,
                idempotent: request.idempotent,
                retry_after,
            };

            match self.retry_policy.decide(&ctx) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        delay_ms = %delay.as_millis(),
                        classification = %classification,
                        error = %failure,
                        "attempt failed, retrying after delay"
                    );
                    // No token, slot or lock is held across this sleep.
                    sleep(delay).await;
                }
                RetryDecision::Stop if classification.is_fatal() => {
                    error!(
                        attempt,
                        classification = %classification,
                        error = %failure,
                        "attempt failed, not retrying"
                    );
                    return Err(failure);
                }
                RetryDecision::Stop => {
                    error!(
                        attempt,
                        classification = %classification,
                        error = %failure,
                        "retry budget exhausted"
                    );
                    return Err(Error::retries_exhausted(attempt, classification, failure));
                }
            }
        }
    }

    /// Runs one attempt: connection slot, send, receive. The slot is
    /// released when this returns, before any decode or backoff.
    #[instrument(name = "dispatch_attempt", skip(self, request), fields(host = %host))]
    async fn dispatch(
        &self,
        host: &str,
        request: &Request,
        deadline: Instant,
    ) -> Result<RawResponse> {
        let budget = remaining_budget(deadline)?;
        let max_wait = self.config.pool_acquire_timeout.min(budget);

        let connection = match self.pool.acquire(host, max_wait).await {
            Ok(connection) => connection,
            Err(err) => {
                // A deadline shorter than the pool budget means the wall
                // clock, not the pool, ended this request.
                if matches!(err, Error::PoolExhausted(_)) && Instant::now() >= deadline {
                    return Err(Error::deadline_exceeded(
                        "deadline expired waiting for a connection slot",
                    ));
                }
                return Err(err);
            }
        };

        let budget = remaining_budget(deadline)?;
        self.send_attempt(connection.client(), request, budget).await
    }

    /// Sends the request bytes and reads the full response within the
    /// attempt budget.
    async fn send_attempt(
        &self,
        client: &Client,
        request: &Request,
        budget: Duration,
    ) -> Result<RawResponse> {
        let mut builder = client
            .request(request.method.clone(), &request.url)
            .timeout(budget)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, body.content_type.as_str())
                .body(body.bytes.clone());
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_transport_error)?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Derives the pool key (`host:port`) for a request URL.
fn pool_key(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::invalid_request(format!("invalid URL {url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::invalid_request(format!("URL has no host: {url}")))?;
    Ok(match parsed.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Time left until the deadline, or `DeadlineExceeded` when none is.
fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let now = Instant::now();
    if now >= deadline {
        return Err(Error::deadline_exceeded("request deadline expired"));
    }
    Ok(deadline - now)
}

/// Parses a `Retry-After` header given in seconds.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Maps a transport failure onto the network taxonomy: timeouts, resets
/// and refused connections are transient; builder and protocol errors
/// are fatal.
fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::network(NetworkError::Timeout)
    } else if err.is_connect() {
        Error::network(NetworkError::ConnectionRefused(err.to_string()))
    } else if err.is_builder() {
        Error::invalid_request(err.to_string())
    } else if err.is_decode() {
        Error::network(NetworkError::Protocol(err.to_string()))
    } else {
        Error::network(NetworkError::ConnectionReset(err.to_string()))
    }
}
