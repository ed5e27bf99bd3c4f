//! Per-request description: method, target, headers, query and cancellation.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Metadata for an individual HTTP request.
///
/// The path is resolved against the selected endpoint (or base URL) unless it
/// is already an absolute URL.
///
/// # Examples
///
/// ```
/// use switchyard::RequestMetadata;
/// use http::Method;
/// use std::time::Duration;
///
/// let meta = RequestMetadata::new(Method::GET, "/search")
///     .with_query_param("q", "rust")
///     .with_query_param("page", "2")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(meta.query_params[1], ("page".to_string(), "2".to_string()));
/// ```
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// The HTTP method (GET, POST, etc.).
    pub method: Method,

    /// The request path, relative to the endpoint or absolute.
    pub path: String,

    /// Additional headers for this request. Applied after client headers.
    pub headers: HeaderMap,

    /// Query parameters, appended in the order given.
    pub query_params: Vec<(String, String)>,

    /// Cancels the call when triggered.
    pub cancellation: Option<CancellationToken>,

    /// Deadline for the whole call, overriding the client timeout. Zero
    /// disables the deadline.
    pub timeout: Option<Duration>,
}

impl RequestMetadata {
    /// Creates a new `RequestMetadata` with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
            cancellation: None,
            timeout: None,
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Appends a query parameter.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Appends several query parameters.
    pub fn with_query_params(
        mut self,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.query_params.extend(params);
        self
    }

    /// Ties the call to a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Sets a deadline for the whole call, retries and failover included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}
