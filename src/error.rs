//! Error types for HTTP calls.
//!
//! Every failure the client can produce is a variant of [`Error`]. Wrapping
//! variants ([`Error::MaxRetriesExceeded`], [`Error::RateLimited`]) keep the
//! original cause reachable, both through [`std::error::Error::source`] and
//! through accessors such as [`Error::status`] that see through them.

use crate::rate_limit::RateLimitInfo;
use http::{HeaderMap, StatusCode};
use std::fmt;

/// Boxed error type accepted from user-supplied interceptors and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where an interceptor error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorStage {
    /// A request interceptor rejected the outbound request.
    Request,
    /// A response interceptor rejected the received response.
    Response,
    /// A middleware `before` hook rejected a transport attempt.
    Middleware,
}

impl fmt::Display for InterceptorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorStage::Request => f.write_str("request"),
            InterceptorStage::Response => f.write_str("response"),
            InterceptorStage::Middleware => f.write_str("middleware"),
        }
    }
}

/// Everything a call can fail with.
///
/// # Examples
///
/// ```no_run
/// use switchyard::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://billing.internal")?
///     .build()?;
///
/// match client.delete::<()>("/invoices/inv-7").await {
///     Ok(_) => {}
///     Err(Error::HttpError { status, raw_response, .. }) if status.as_u16() == 409 => {
///         eprintln!("invoice already settled: {}", raw_response);
///     }
///     Err(e) if e.is_cancellation() => eprintln!("gave up: {}", e),
///     Err(e) => return Err(e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error occurred (connection failed, body read failed, etc.).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A single transport attempt exceeded its timeout.
    ///
    /// Attempt timeouts are transient and may be retried.
    #[error("Request timed out")]
    Timeout,

    /// The deadline governing the whole call elapsed.
    ///
    /// Unlike [`Error::Timeout`] this is never retried and stops failover.
    #[error("call deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the call.
    #[error("request cancelled")]
    Cancelled,

    /// The response body did not match the requested type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// Body as received
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The server answered with a status of 400 or above.
    ///
    /// The message has the shape `HTTP <status>: <body>`.
    #[error("HTTP {}: {raw_response}", .status.as_u16())]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
        /// Rate limit hints parsed from the response headers, if any
        rate_limit_info: Option<RateLimitInfo>,
    },

    /// The client or request was configured inconsistently.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Every permitted attempt failed.
    #[error("max retries exceeded: {last_error}")]
    MaxRetriesExceeded {
        /// Transport attempts made, including the first
        attempts: usize,
        /// The last error encountered
        #[source]
        last_error: Box<Error>,
    },

    /// The request body could not be encoded as JSON.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The base URL or request path did not parse.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// None of the addresses the target host resolves to is whitelisted.
    #[error("IP not whitelisted for host {host}")]
    AccessDenied {
        /// The host that was rejected
        host: String,
    },

    /// The target host could not be resolved for the whitelist check.
    #[error("failed to resolve host {host}: {source}")]
    HostResolution {
        /// The host that failed to resolve
        host: String,
        /// The resolver error
        #[source]
        source: std::io::Error,
    },

    /// Waiting for a rate limiter token was cut short.
    #[error("rate limit exceeded: {0}")]
    RateLimited(#[source] Box<Error>),

    /// The circuit breaker rejected the attempt without touching the network.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// An interceptor or middleware hook rejected the call.
    #[error("{stage} interceptor failed: {source}")]
    Interceptor {
        /// Which hook failed
        stage: InterceptorStage,
        /// The error returned by the hook
        #[source]
        source: BoxError,
    },

    /// The request could not be signed.
    #[error("request signing failed: {0}")]
    Signing(String),

    /// A gzip-encoded response body could not be decoded.
    #[error("gzip decompression failed: {0}")]
    Decompression(#[source] std::io::Error),
}

impl Error {
    /// Whether another attempt might succeed: transport failures, attempt
    /// timeouts, undecodable bodies and 5xx responses.
    ///
    /// ```
    /// use switchyard::Error;
    /// use http::{HeaderMap, StatusCode};
    ///
    /// let unavailable = Error::HttpError {
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     raw_response: String::new(),
    ///     headers: HeaderMap::new(),
    ///     rate_limit_info: None,
    /// };
    /// assert!(unavailable.is_retryable());
    /// assert!(!Error::DeadlineExceeded.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Timeout => true,
            Error::Decompression(_) => true,
            Error::HttpError { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    /// Returns `true` for HTTP responses in the `[400, 500)` range.
    ///
    /// Client errors are never retried and do not count against the circuit
    /// breaker.
    pub fn is_client_error(&self) -> bool {
        matches!(self.root_cause(), Error::HttpError { status, .. } if status.is_client_error())
    }

    /// Returns `true` if the call stopped because it was cancelled or its
    /// deadline elapsed.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root_cause(), Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Follows wrapping variants down to the error that caused them.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::MaxRetriesExceeded { last_error, .. } => last_error.root_cause(),
            Error::RateLimited(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Status of the response behind this error, if one arrived.
    pub fn status(&self) -> Option<StatusCode> {
        match self.root_cause() {
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Body of the response behind this error, if one arrived.
    pub fn raw_response(&self) -> Option<&str> {
        match self.root_cause() {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Server rate-limit hints carried by an HTTP error.
    pub fn rate_limit_info(&self) -> Option<&RateLimitInfo> {
        match self.root_cause() {
            Error::HttpError {
                rate_limit_info, ..
            } => rate_limit_info.as_ref(),
            _ => None,
        }
    }

    /// Returns the server-recommended delay capped by `max_wait`.
    pub fn rate_limit_delay(&self, max_wait: std::time::Duration) -> Option<std::time::Duration> {
        self.rate_limit_info()?.delay(max_wait)
    }

    /// Builds an [`Error::HttpError`] from a failed response.
    pub(crate) fn from_status(status: StatusCode, body: &[u8], headers: HeaderMap) -> Self {
        let info = RateLimitInfo::from_headers(&headers);
        Error::HttpError {
            status,
            raw_response: String::from_utf8_lossy(body).into_owned(),
            rate_limit_info: info.has_hints().then_some(info),
            headers,
        }
    }
}

/// A specialized `Result` type for HTTP calls.
pub type Result<T> = std::result::Result<T, Error>;
