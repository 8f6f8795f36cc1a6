//! Bounded per-host connection pooling.
//!
//! The pool bounds how many requests may simultaneously occupy a
//! connection to one host: each host gets a semaphore with
//! `max_per_host` permits, and [`ConnectionPool::acquire`] hands out a
//! scoped [`PooledConnection`] that returns its slot on drop. Waiting
//! past the acquire timeout fails with
//! [`Error::PoolExhausted`](crate::error::Error::PoolExhausted).
//!
//! Socket reuse, liveness validation and the transparent replacement of
//! dead connections are delegated to the reqwest/hyper pool underneath,
//! configured here with idle bounds — a handle therefore never exposes a
//! dead connection to its holder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::ProxyConfig;
use crate::error::{Error, Result};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct ConnectionPoolConfig {
    /// Maximum concurrent connections per host.
    pub max_per_host: usize,
    /// How long `acquire` may wait for a free slot.
    pub acquire_timeout: Duration,
    /// How long an idle connection is kept alive for reuse.
    pub idle_timeout: Duration,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// `User-Agent` header value for outbound requests.
    pub user_agent: String,
    /// Optional proxy for all pooled connections.
    pub proxy: Option<ProxyConfig>,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_per_host: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
                .to_string(),
            proxy: None,
        }
    }
}

/// Bounded pool of reusable transport connections, keyed by host.
#[derive(Debug)]
pub struct ConnectionPool {
    client: Client,
    config: ConnectionPoolConfig,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ConnectionPool {
    /// Creates a pool and its underlying transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the transport
    /// cannot be built.
    pub fn new(config: ConnectionPoolConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .gzip(true)
            .user_agent(&config.user_agent);

        if let Some(proxy_config) = &config.proxy {
            let mut proxy = reqwest::Proxy::all(&proxy_config.url).map_err(|e| {
                Error::invalid_request(format!("invalid proxy URL: {e}"))
            })?;
            if let (Some(username), Some(password)) =
                (&proxy_config.username, &proxy_config.password)
            {
                proxy = proxy.basic_auth(username, password);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            Error::invalid_request(format!("failed to build transport: {e}"))
        })?;

        Ok(Self {
            client,
            config,
            hosts: Mutex::new(HashMap::new()),
        })
    }

    /// Returns a reference to the pool configuration.
    pub fn config(&self) -> &ConnectionPoolConfig {
        &self.config
    }

    /// Acquires a connection slot for `host`, waiting at most `max_wait`.
    ///
    /// The returned handle releases its slot when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] when no slot frees up in time.
    pub async fn acquire(&self, host: &str, max_wait: Duration) -> Result<PooledConnection<'_>> {
        let semaphore = {
            let mut hosts = self.hosts.lock().await;
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_per_host)))
                .clone()
        };

        let permit = match tokio::time::timeout(max_wait, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(Error::pool_exhausted(format!(
                    "connection pool for {host} is closed"
                )));
            }
            Err(_) => {
                debug!(host = %host, waited_ms = %max_wait.as_millis(), "pool acquire timed out");
                return Err(Error::pool_exhausted(format!(
                    "no connection slot for {host} freed up within {}ms",
                    max_wait.as_millis()
                )));
            }
        };

        Ok(PooledConnection {
            client: &self.client,
            _permit: permit,
        })
    }

    /// Number of free slots for `host`; `None` if the host has not been
    /// contacted yet.
    pub async fn available_slots(&self, host: &str) -> Option<usize> {
        let hosts = self.hosts.lock().await;
        hosts.get(host).map(|sem| sem.available_permits())
    }
}

/// A scoped connection slot; the slot is returned to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection<'a> {
    client: &'a Client,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection<'_> {
    /// The transport to send the request on. Reuse, liveness checks and
    /// replacement of dead sockets happen below this handle.
    pub fn client(&self) -> &Client {
        self.client
    }
}
