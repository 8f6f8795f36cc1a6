//! Error handling for the request execution engine.
//!
//! Failures are strongly typed with `thiserror`, sized for cheap passing
//! (large variants are boxed), and classified so the executor can decide
//! between retrying and surfacing:
//!
//! ```text
//! Error
//! ├── RateLimitTimeout  - no token became available within the wait budget
//! ├── PoolExhausted     - no connection slot freed up within the wait budget
//! ├── Network           - transport layer failures (via NetworkError)
//! ├── Http              - non-2xx response, normalized body attached
//! ├── Decode            - malformed JSON/XML payload (via DecodeError)
//! ├── DeadlineExceeded  - the logical request ran out of wall-clock time
//! ├── RetriesExhausted  - transient failures outlasted the retry budget
//! ├── InvalidRequest    - the request could never be sent as given
//! └── Context           - error with an attached context message
//! ```
//!
//! Only the executor retries; every other component raises its typed
//! failure and returns. [`Error::classification`] exposes the
//! transient/fatal split that drives the retry loop.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::normalizer::CanonicalBody;

/// Result type alias for all engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Transient failure kinds: believed safe to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransientKind {
    /// The attempt timed out before a response arrived.
    Timeout,
    /// The connection dropped mid-exchange.
    ConnectionReset,
    /// The connection could not be established at all; no bytes were sent.
    ConnectionRefused,
    /// The server answered with a 5xx status.
    ServerError(u16),
    /// The server answered 429 Too Many Requests.
    RateLimited,
}

/// Fatal failure kinds: must not be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FatalKind {
    /// The server answered with a non-retryable 4xx status.
    ClientError(u16),
    /// The request was malformed before any network contact.
    InvalidRequest,
    /// The response body failed to decode.
    Decode,
    /// The transport violated the protocol (TLS failure, bad framing).
    Protocol,
}

/// Classification of a failed attempt, consumed by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Recoverable by retry.
    Transient(TransientKind),
    /// Retrying cannot help.
    Fatal(FatalKind),
}

impl FailureClass {
    /// Returns `true` for failures the retry policy may act on.
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureClass::Transient(_))
    }

    /// Returns `true` for failures that stop the retry loop immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureClass::Fatal(_))
    }

    /// Returns `true` when the failure is guaranteed to have occurred
    /// before any request byte reached the server.
    ///
    /// Only these failures are retried for non-idempotent requests when
    /// the policy is configured not to assume server-side idempotency.
    pub fn precedes_send(&self) -> bool {
        matches!(self, FailureClass::Transient(TransientKind::ConnectionRefused))
    }

    /// Classifies a non-2xx HTTP status: 5xx and 429 are transient,
    /// every other 4xx is fatal.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureClass::Transient(TransientKind::RateLimited),
            500..=599 => FailureClass::Transient(TransientKind::ServerError(status)),
            _ => FailureClass::Fatal(FatalKind::ClientError(status)),
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Transient(kind) => match kind {
                TransientKind::Timeout => write!(f, "transient (timeout)"),
                TransientKind::ConnectionReset => write!(f, "transient (connection reset)"),
                TransientKind::ConnectionRefused => write!(f, "transient (connection refused)"),
                TransientKind::ServerError(s) => write!(f, "transient (server error {s})"),
                TransientKind::RateLimited => write!(f, "transient (rate limited)"),
            },
            FailureClass::Fatal(kind) => match kind {
                FatalKind::ClientError(s) => write!(f, "fatal (client error {s})"),
                FatalKind::InvalidRequest => write!(f, "fatal (invalid request)"),
                FatalKind::Decode => write!(f, "fatal (decode error)"),
                FatalKind::Protocol => write!(f, "fatal (protocol violation)"),
            },
        }
    }
}

/// Encapsulated network errors hiding transport implementation details.
///
/// Third-party error types (like `reqwest::Error`) are never exposed in
/// the public API, so the HTTP backend can change without breaking
/// callers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NetworkError {
    /// The attempt timed out.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established (refused, unreachable,
    /// DNS failure). No request bytes were sent.
    #[error("connection failed: {0}")]
    ConnectionRefused(String),

    /// The connection dropped after the request may have been sent.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// TLS negotiation or certificate failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The peer violated the HTTP protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Opaque transport error preserving the underlying source.
    #[error("transport error")]
    Transport(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl NetworkError {
    /// Maps a network failure onto the retry classification.
    pub fn classification(&self) -> FailureClass {
        match self {
            NetworkError::Timeout => FailureClass::Transient(TransientKind::Timeout),
            NetworkError::ConnectionRefused(_) => {
                FailureClass::Transient(TransientKind::ConnectionRefused)
            }
            NetworkError::ConnectionReset(_) | NetworkError::Transport(_) => {
                FailureClass::Transient(TransientKind::ConnectionReset)
            }
            NetworkError::Tls(_) | NetworkError::Protocol(_) => {
                FailureClass::Fatal(FatalKind::Protocol)
            }
        }
    }
}

/// Errors raised while decoding a response body.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    /// The body declared JSON but failed to parse.
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    /// The body declared XML but failed to parse.
    #[error("malformed XML: {0}")]
    MalformedXml(String),
}

/// Details for a non-2xx HTTP response.
///
/// The normalized body is kept so API-specific error payloads remain
/// inspectable by the caller.
#[derive(Debug)]
#[non_exhaustive]
pub struct HttpErrorDetails {
    /// HTTP status code.
    pub status: u16,
    /// Normalized response body.
    pub body: CanonicalBody,
}

impl fmt::Display for HttpErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP status {}", self.status)
    }
}

/// Details for a request whose transient failures outlasted the retry
/// budget.
#[derive(Debug)]
#[non_exhaustive]
pub struct ExhaustionDetails {
    /// Number of network attempts performed.
    pub attempts: u32,
    /// Classification of the final failure.
    pub classification: FailureClass,
    /// The final failure itself, body included when one was received.
    pub last_error: Error,
}

impl fmt::Display for ExhaustionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt{}",
            self.classification,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" }
        )
    }
}

/// The primary error type of the engine.
///
/// Large variants are boxed to keep the enum small; static messages use
/// `Cow<'static, str>` to avoid allocation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No rate-limit token became available within the wait budget.
    #[error("rate limit timeout: {0}")]
    RateLimitTimeout(Cow<'static, str>),

    /// No connection slot for the host freed up within the wait budget.
    #[error("connection pool exhausted: {0}")]
    PoolExhausted(Cow<'static, str>),

    /// Transport layer failure.
    #[error("network error: {0}")]
    Network(Box<NetworkError>),

    /// The server answered with a non-2xx status.
    #[error("{0}")]
    Http(Box<HttpErrorDetails>),

    /// The response body failed to decode.
    #[error("decode error: {0}")]
    Decode(Box<DecodeError>),

    /// The logical request ran out of wall-clock time.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(Cow<'static, str>),

    /// Transient failures outlasted the retry budget.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(Box<ExhaustionDetails>),

    /// The request could never be sent as given.
    #[error("invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    /// Error with additional context, preserving the chain.
    #[error("{context}")]
    Context {
        /// Describes the operation that failed.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a rate-limit timeout error.
    pub fn rate_limit_timeout(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::RateLimitTimeout(msg.into())
    }

    /// Creates a pool exhaustion error.
    pub fn pool_exhausted(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::PoolExhausted(msg.into())
    }

    /// Creates a network error from a `NetworkError` kind.
    pub fn network(err: NetworkError) -> Self {
        Self::Network(Box::new(err))
    }

    /// Creates an HTTP error from a status code and its normalized body.
    pub fn http(status: u16, body: CanonicalBody) -> Self {
        Self::Http(Box::new(HttpErrorDetails { status, body }))
    }

    /// Creates a malformed-JSON decode error.
    pub fn malformed_json(msg: impl Into<String>) -> Self {
        Self::Decode(Box::new(DecodeError::MalformedJson(msg.into())))
    }

    /// Creates a malformed-XML decode error.
    pub fn malformed_xml(msg: impl Into<String>) -> Self {
        Self::Decode(Box::new(DecodeError::MalformedXml(msg.into())))
    }

    /// Creates a deadline-exceeded error.
    pub fn deadline_exceeded(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::DeadlineExceeded(msg.into())
    }

    /// Creates a retries-exhausted error wrapping the final failure.
    pub fn retries_exhausted(
        attempts: u32,
        classification: FailureClass,
        last_error: Error,
    ) -> Self {
        Self::RetriesExhausted(Box::new(ExhaustionDetails {
            attempts,
            classification,
            last_error,
        }))
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Attaches context to an existing error.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the root cause, skipping `Context` layers.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Maps the error onto the retry classification, when one applies.
    ///
    /// Rate-limit timeouts, pool exhaustion, and deadline expiry are
    /// terminal conditions of the engine itself rather than attempt
    /// failures; they carry no classification.
    pub fn classification(&self) -> Option<FailureClass> {
        match self.root_cause() {
            Error::Network(err) => Some(err.classification()),
            Error::Http(details) => Some(FailureClass::from_status(details.status)),
            Error::Decode(_) => Some(FailureClass::Fatal(FatalKind::Decode)),
            Error::InvalidRequest(_) => Some(FailureClass::Fatal(FatalKind::InvalidRequest)),
            Error::RetriesExhausted(details) => Some(details.classification),
            _ => None,
        }
    }

    /// Returns `true` when the failure is believed safe to retry.
    pub fn is_transient(&self) -> bool {
        self.classification().is_some_and(|c| c.is_transient())
    }

    /// Returns the number of attempts consumed, when the error records it.
    pub fn attempts(&self) -> Option<u32> {
        match self.root_cause() {
            Error::RetriesExhausted(details) => Some(details.attempts),
            _ => None,
        }
    }

    /// Returns the normalized error body from the remote service, when
    /// one was received.
    pub fn response_body(&self) -> Option<&CanonicalBody> {
        match self.root_cause() {
            Error::Http(details) => Some(&details.body),
            Error::RetriesExhausted(details) => details.last_error.response_body(),
            _ => None,
        }
    }

    /// Returns the HTTP status of the last response, when one was
    /// received.
    pub fn status(&self) -> Option<u16> {
        match self.root_cause() {
            Error::Http(details) => Some(details.status),
            Error::RetriesExhausted(details) => details.last_error.status(),
            _ => None,
        }
    }
}

impl From<NetworkError> for Error {
    fn from(err: NetworkError) -> Self {
        Self::Network(Box::new(err))
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Self::Decode(Box::new(err))
    }
}

/// Extension trait for attaching context to `Result` values.
pub trait ContextExt<T> {
    /// Wraps the error with a static context message.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wraps the error with a lazily computed context message.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ContextExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Configuration validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// A field exceeds its allowed maximum.
    #[error("{field} = {value} exceeds maximum {max}")]
    ValueTooHigh {
        /// Offending field name.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// The allowed maximum.
        max: String,
    },

    /// A field falls below its allowed minimum.
    #[error("{field} = {value} is below minimum {min}")]
    ValueTooLow {
        /// Offending field name.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// The allowed minimum.
        min: String,
    },
}

impl ConfigValidationError {
    /// Creates a `ValueTooHigh` error.
    pub fn too_high(field: &'static str, value: impl ToString, max: impl ToString) -> Self {
        Self::ValueTooHigh {
            field,
            value: value.to_string(),
            max: max.to_string(),
        }
    }

    /// Creates a `ValueTooLow` error.
    pub fn too_low(field: &'static str, value: impl ToString, min: impl ToString) -> Self {
        Self::ValueTooLow {
            field,
            value: value.to_string(),
            min: min.to_string(),
        }
    }

    /// Returns the offending field name.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::ValueTooHigh { field, .. } | Self::ValueTooLow { field, .. } => field,
        }
    }
}

impl From<ConfigValidationError> for Error {
    fn from(err: ConfigValidationError) -> Self {
        Error::invalid_request(err.to_string())
    }
}

/// Outcome of a successful configuration validation, possibly carrying
/// warnings for suboptimal but valid settings.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Human-readable warnings.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Creates a validation result carrying the given warnings.
    #[must_use]
    pub fn with_warnings(warnings: Vec<String>) -> Self {
        Self { warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_size_stays_small() {
        assert!(std::mem::size_of::<Error>() <= 56);
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            FailureClass::from_status(429),
            FailureClass::Transient(TransientKind::RateLimited)
        );
        assert_eq!(
            FailureClass::from_status(503),
            FailureClass::Transient(TransientKind::ServerError(503))
        );
        assert_eq!(
            FailureClass::from_status(404),
            FailureClass::Fatal(FatalKind::ClientError(404))
        );
        assert_eq!(
            FailureClass::from_status(400),
            FailureClass::Fatal(FatalKind::ClientError(400))
        );
    }

    #[test]
    fn network_classification() {
        assert!(NetworkError::Timeout.classification().is_transient());
        assert!(
            NetworkError::ConnectionRefused("refused".into())
                .classification()
                .precedes_send()
        );
        assert!(
            NetworkError::Protocol("bad framing".into())
                .classification()
                .is_fatal()
        );
    }

    #[test]
    fn reset_does_not_precede_send() {
        let class = NetworkError::ConnectionReset("reset by peer".into()).classification();
        assert!(class.is_transient());
        assert!(!class.precedes_send());
    }

    #[test]
    fn context_preserves_root_cause() {
        let err = Error::network(NetworkError::Timeout)
            .context("fetching /v1/items")
            .context("listing items");

        assert!(matches!(err.root_cause(), Error::Network(_)));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "listing items");
    }

    #[test]
    fn exhaustion_carries_attempts_and_body() {
        let body = CanonicalBody::Json(serde_json::json!({"error": "overloaded"}));
        let last = Error::http(503, body);
        let err = Error::retries_exhausted(3, FailureClass::from_status(503), last);

        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.status(), Some(503));
        let recovered = err.response_body().and_then(CanonicalBody::as_json);
        assert_eq!(recovered.unwrap()["error"], "overloaded");
    }

    #[test]
    fn engine_level_errors_have_no_classification() {
        assert!(Error::rate_limit_timeout("waited 100ms").classification().is_none());
        assert!(Error::pool_exhausted("no slot").classification().is_none());
        assert!(Error::deadline_exceeded("50ms budget").classification().is_none());
    }

    #[test]
    fn decode_error_is_fatal() {
        let err = Error::malformed_json("unexpected end of input");
        assert_eq!(
            err.classification(),
            Some(FailureClass::Fatal(FatalKind::Decode))
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn config_validation_display() {
        let err = ConfigValidationError::too_high("max_attempts", 15, 10);
        assert_eq!(err.field_name(), "max_attempts");
        assert!(err.to_string().contains("max_attempts"));
        assert!(err.to_string().contains("15"));
    }

    #[test]
    fn context_ext_on_results() {
        let result: Result<()> = Err(Error::network(NetworkError::Timeout));
        let wrapped = result.with_context(|| "syncing inventory");
        assert_eq!(wrapped.unwrap_err().to_string(), "syncing inventory");
    }
}
