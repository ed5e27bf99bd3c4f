//! Response wrapper that preserves both parsed data and raw response details.
//!
//! The [`Response`] type wraps the response data along with metadata about the
//! call: timing, retry attempts, whether it came from the cache, and the raw
//! body for debugging.

use crate::{Error, Result};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// A successful HTTP response.
///
/// # Type Parameters
///
/// * `T` - The type of the response data. [`crate::Client::send`] returns
///   `Response<Bytes>`; the typed helpers return the deserialized body.
///
/// # Examples
///
/// ```no_run
/// use switchyard::Client;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let catalog = Client::builder()
///     .base_url("https://catalog.internal")?
///     .build()?
///     .with_cache(Duration::from_secs(30))?;
///
/// let page = catalog.get::<serde_json::Value>("/products?page=2").await?;
/// if page.from_cache {
///     println!("cached copy of {}", page.url);
/// } else if page.was_retried() {
///     println!("{} attempts, {:?}", page.attempts, page.latency);
/// }
/// println!("etag: {:?}", page.header("etag"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The response data.
    pub data: T,

    /// The raw (decompressed) response body.
    pub raw_body: Bytes,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time from the start of the call until the response was available,
    /// retries included.
    pub latency: Duration,

    /// Transport attempts made by the client that answered. Zero for cache hits.
    pub attempts: usize,

    /// `true` if the response was served from the response cache.
    pub from_cache: bool,

    /// The URL the response came from.
    pub url: Url,
}

impl<T> Response<T> {
    /// Creates a response for a single uncached attempt.
    pub fn new(data: T, raw_body: Bytes, status: StatusCode, headers: HeaderMap, url: Url) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency: Duration::ZERO,
            attempts: 1,
            from_cache: false,
            url,
        }
    }

    /// Transforms `data`, keeping the rest of the response.
    ///
    /// ```
    /// # use switchyard::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// let count = Response::new(
    ///     7u32,
    ///     "7".into(),
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     "http://stock.internal/count".parse().unwrap(),
    /// );
    ///
    /// let low = count.map(|n| n < 10);
    /// assert!(low.data);
    /// assert_eq!(low.text(), "7");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            from_cache: self.from_cache,
            url: self.url,
        }
    }

    /// More than one transport attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a reference to a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The raw body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw_body).into_owned()
    }

    /// Deserializes the raw body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] carrying the raw body.
    ///
    /// An empty body is read as `null`.
    pub fn json<U: DeserializeOwned>(&self) -> Result<U> {
        let raw: &[u8] = if self.raw_body.is_empty() {
            b"null"
        } else {
            &self.raw_body
        };
        serde_json::from_slice(raw).map_err(|e| {
            tracing::error!(
                status = self.status.as_u16(),
                url = %self.url,
                error = %e,
                "Failed to deserialize response"
            );
            Error::DeserializationFailed {
                raw_response: self.text(),
                serde_error: e.to_string(),
                status: self.status,
            }
        })
    }
}

impl Response<Bytes> {
    /// Deserializes the body into `U`, keeping the response metadata.
    pub fn into_json<U: DeserializeOwned>(self) -> Result<Response<U>> {
        let data = self.json()?;
        Ok(self.map(|_| data))
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
