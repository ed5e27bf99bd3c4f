//! Request and response interceptors.
//!
//! Interceptors run once per call, in registration order. Request
//! interceptors see the fully assembled request before it is signed;
//! response interceptors see the final response after retries. An error from
//! either aborts the call with [`crate::Error::Interceptor`].
//!
//! Plain closures implement both traits:
//!
//! ```no_run
//! use switchyard::Client;
//!
//! # fn example() -> Result<(), switchyard::Error> {
//! let client = Client::builder()
//!     .base_url("https://api.example.com")?
//!     .request_interceptor(|req: &mut reqwest::Request| -> Result<(), switchyard::BoxError> {
//!         req.headers_mut().insert("x-trace", "1".parse()?);
//!         Ok(())
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::error::BoxError;
use crate::Response;
use async_trait::async_trait;
use bytes::Bytes;

/// Modifies or rejects an outbound request.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn intercept(&self, request: &mut reqwest::Request) -> Result<(), BoxError>;
}

/// Inspects, modifies or rejects a received response.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn intercept(&self, response: &mut Response<Bytes>) -> Result<(), BoxError>;
}

#[async_trait]
impl<F> RequestInterceptor for F
where
    F: Fn(&mut reqwest::Request) -> Result<(), BoxError> + Send + Sync,
{
    async fn intercept(&self, request: &mut reqwest::Request) -> Result<(), BoxError> {
        self(request)
    }
}

#[async_trait]
impl<F> ResponseInterceptor for F
where
    F: Fn(&mut Response<Bytes>) -> Result<(), BoxError> + Send + Sync,
{
    async fn intercept(&self, response: &mut Response<Bytes>) -> Result<(), BoxError> {
        self(response)
    }
}

/// Adds a fixed header to every request.
#[derive(Debug, Clone)]
pub struct HeaderInjector {
    name: http::HeaderName,
    value: http::HeaderValue,
}

impl HeaderInjector {
    pub fn new(name: http::HeaderName, value: http::HeaderValue) -> Self {
        Self { name, value }
    }
}

#[async_trait]
impl RequestInterceptor for HeaderInjector {
    async fn intercept(&self, request: &mut reqwest::Request) -> Result<(), BoxError> {
        request
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> reqwest::Request {
        reqwest::Request::new(
            reqwest::Method::GET,
            "http://localhost/".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn closure_interceptor_mutates_request() {
        let interceptor = |req: &mut reqwest::Request| -> Result<(), BoxError> {
            req.headers_mut().insert("x-one", "1".parse()?);
            Ok(())
        };
        let mut req = request();
        RequestInterceptor::intercept(&interceptor, &mut req).await.unwrap();
        assert_eq!(req.headers()["x-one"], "1");
    }

    #[tokio::test]
    async fn header_injector_overwrites() {
        let injector = HeaderInjector::new(
            http::HeaderName::from_static("x-env"),
            http::HeaderValue::from_static("test"),
        );
        let mut req = request();
        req.headers_mut().insert("x-env", "prod".parse().unwrap());
        injector.intercept(&mut req).await.unwrap();
        assert_eq!(req.headers()["x-env"], "test");
    }

    #[tokio::test]
    async fn closure_interceptor_can_reject() {
        let interceptor =
            |_: &mut reqwest::Request| -> Result<(), BoxError> { Err("blocked".into()) };
        let err = RequestInterceptor::intercept(&interceptor, &mut request())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "blocked");
    }
}
