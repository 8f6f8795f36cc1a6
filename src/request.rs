//! Logical request and response types.
//!
//! A [`Request`] describes one caller-visible operation; the executor
//! may realize it as several network attempts. Requests are built with
//! consuming `with_*` setters and are immutable once submitted. The
//! [`Response`] returned to the caller carries the normalized body and
//! the number of attempts consumed.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::normalizer::{self, CanonicalBody};

/// A request payload with its declared content type.
#[derive(Debug, Clone)]
pub struct RequestBody {
    /// Value for the `Content-Type` header.
    pub content_type: String,
    /// Raw payload bytes.
    pub bytes: Bytes,
}

impl RequestBody {
    /// Serializes a value as a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| Error::invalid_request(format!("JSON serialization failed: {e}")))?;
        Ok(Self {
            content_type: "application/json".to_string(),
            bytes: Bytes::from(bytes),
        })
    }

    /// Encodes ordered pairs as an `x-www-form-urlencoded` body.
    pub fn form<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self {
            content_type: "application/x-www-form-urlencoded".to_string(),
            bytes: Bytes::from(normalizer::encode_form(pairs)),
        }
    }

    /// Wraps raw bytes with an explicit content type.
    pub fn raw(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// One logical request, immutable once submitted.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Fully qualified target URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Optional payload with its declared content type.
    pub body: Option<RequestBody>,
    /// Whether repeating this request is safe. Defaults from the method
    /// (GET/HEAD/PUT/DELETE/OPTIONS yes, POST/PATCH no); callers with
    /// idempotency keys may override.
    pub idempotent: bool,
    /// Per-request deadline; the engine default applies when absent.
    pub timeout: Option<Duration>,
}

impl Request {
    /// Creates a request with the given method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let idempotent = method_is_idempotent(&method);
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            idempotent,
            timeout: None,
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Creates a PUT request.
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Creates a PATCH request.
    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// Creates a DELETE request.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Replaces the header map.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Appends a single header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attaches a prepared body.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes and attaches a JSON body.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = Some(RequestBody::json(value)?);
        Ok(self)
    }

    /// Encodes and attaches a form body.
    #[must_use]
    pub fn with_form<'a, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.body = Some(RequestBody::form(pairs));
        self
    }

    /// Overrides the idempotency flag.
    #[must_use]
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Sets a per-request deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn method_is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

/// A successful, normalized response. Owned by the caller.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code (always 2xx; other statuses surface as errors).
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Normalized body.
    pub body: CanonicalBody,
    /// Number of network attempts this logical request consumed.
    pub attempts: u32,
}

impl Response {
    /// Returns the JSON value, if the body is JSON.
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.body.as_json()
    }
}
