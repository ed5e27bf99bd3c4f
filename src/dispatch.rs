//! The request pipeline every call goes through.
//!
//! A call resolves its target, passes the whitelist and rate limiter, may be
//! answered from cache, and is otherwise sent through the retry loop with the
//! circuit breaker consulted on every attempt. When the primary fails, each
//! backup client runs the same pipeline in order.

use crate::{
    cache::CachedResponse,
    circuit_breaker::BreakerSignal,
    client::Client,
    compression,
    context::CallContext,
    error::InterceptorStage,
    load_balancer::{EndpointSelector, Selection},
    metadata::RequestMetadata,
    middleware::AttemptRecord,
    Error, Response, Result,
};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde::Serialize;
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

/// A request body serialized up front, or the serializer's message.
pub(crate) type EncodedBody = std::result::Result<Bytes, String>;

pub(crate) fn encode_body<B: Serialize + ?Sized>(body: &B) -> EncodedBody {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|e| e.to_string())
}

/// Resolves `path` against `base` and appends query pairs in order.
///
/// Absolute paths are used as they are.
pub(crate) fn resolve_url(
    base: Option<&Url>,
    path: &str,
    query: &[(String, String)],
) -> Result<Url> {
    let mut url = match Url::parse(path) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(path)?,
            None => {
                return Err(Error::ConfigurationError(format!(
                    "relative path {:?} needs a base URL",
                    path
                )))
            }
        },
        Err(e) => return Err(e.into()),
    };
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Network(e)
    }
}

/// Strips the encoding headers of a body that was gunzipped.
fn decode_body(headers: &mut HeaderMap, body: Bytes) -> Result<Bytes> {
    if !compression::is_gzip(headers) {
        return Ok(body);
    }
    let decoded = compression::gunzip(&body)?;
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    Ok(Bytes::from(decoded))
}

impl Client {
    /// Sends a request through the full pipeline and returns the raw
    /// response.
    ///
    /// The call deadline is the metadata's timeout, or the client timeout
    /// when it sets none. When every attempt against the primary target
    /// fails, the backups are tried in order with the same request; the
    /// first success wins and otherwise the last error is returned.
    /// Cancellation stops failover.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use switchyard::{Client, RequestMetadata};
    /// use http::Method;
    /// use std::time::Duration;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn example() -> Result<(), switchyard::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    ///
    /// let token = CancellationToken::new();
    /// let metadata = RequestMetadata::new(Method::GET, "/reports")
    ///     .with_query_param("since", "2024-01-01")
    ///     .with_timeout(Duration::from_secs(5))
    ///     .with_cancellation(token.clone());
    ///
    /// let response = client.send::<()>(metadata, None).await?;
    /// println!("{} bytes after {} attempts", response.raw_body.len(), response.attempts);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send<B>(
        &self,
        metadata: RequestMetadata,
        body: Option<&B>,
    ) -> Result<Response<Bytes>>
    where
        B: Serialize + ?Sized,
    {
        let ctx = CallContext::new(
            metadata.cancellation.clone(),
            Some(metadata.timeout.unwrap_or(self.inner.config.timeout)),
        );
        let body = body.map(encode_body);

        let mut last_error = match self.run_pipeline(&metadata, body.as_ref(), &ctx).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        for backup in &self.inner.backups {
            if last_error.is_cancellation() {
                break;
            }
            warn!(
                backup = backup.config().base_url.as_ref().map(Url::as_str),
                error = %last_error,
                "Primary target failed, trying backup endpoint"
            );
            match backup.run_pipeline(&metadata, body.as_ref(), &ctx).await {
                Ok(response) => return Ok(response),
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }

    fn select_endpoint(&self) -> Option<Selection> {
        let lb = self.inner.load_balancer.as_ref()?;
        match &self.inner.health {
            Some(health) if health.config().route_around_unhealthy => {
                // With nothing healthy, rotate over the whole pool as usual.
                let any_healthy = lb.list().iter().any(|e| health.is_healthy(e));
                lb.next_where(&|endpoint| !any_healthy || health.is_healthy(endpoint))
                    // Health flipped between the scan and the pick.
                    .or_else(|| lb.next())
            }
            _ => lb.next(),
        }
    }

    pub(crate) async fn run_pipeline(
        &self,
        metadata: &RequestMetadata,
        body: Option<&EncodedBody>,
        ctx: &CallContext,
    ) -> Result<Response<Bytes>> {
        let started = Instant::now();
        let config = &self.inner.config;

        // Held until the call finishes so least-connections sees it in flight.
        let selection = self.select_endpoint();
        let url = match &selection {
            Some(selection) => {
                let base = Url::parse(selection.endpoint())?;
                resolve_url(Some(&base), &metadata.path, &metadata.query_params)?
            }
            None => resolve_url(config.base_url.as_ref(), &metadata.path, &metadata.query_params)?,
        };

        self.inner.whitelist.check(&url, ctx).await?;

        if let Some(limiter) = &self.inner.rate_limiter {
            limiter
                .acquire(ctx)
                .await
                .map_err(|e| Error::RateLimited(Box::new(e)))?;
        }

        if let Some(cache) = &self.inner.cache {
            if let Some(hit) = cache.lookup(&metadata.method, url.as_str()) {
                debug!(url = %url, "Serving response from cache");
                let mut response =
                    Response::new(hit.body.clone(), hit.body, hit.status, hit.headers, url);
                response.attempts = 0;
                response.from_cache = true;
                self.intercept_response(&mut response).await?;
                response.latency = started.elapsed();
                return Ok(response);
            }
        }

        let request = self.prepare_request(metadata, &url, body).await?;
        let request = &request;

        let (mut response, attempts) = self
            .inner
            .retry
            .execute(ctx, move |attempt| self.attempt(request, attempt, ctx))
            .await?;
        response.attempts = attempts;

        if let Some(cache) = &self.inner.cache {
            cache.store(
                &metadata.method,
                url.as_str(),
                CachedResponse {
                    status: response.status,
                    headers: response.headers.clone(),
                    body: response.raw_body.clone(),
                },
            );
        }

        self.intercept_response(&mut response).await?;
        response.latency = started.elapsed();
        drop(selection);
        Ok(response)
    }

    async fn intercept_response(&self, response: &mut Response<Bytes>) -> Result<()> {
        for interceptor in &self.inner.config.response_interceptors {
            interceptor
                .intercept(response)
                .await
                .map_err(|source| Error::Interceptor {
                    stage: InterceptorStage::Response,
                    source,
                })?;
        }
        Ok(())
    }

    /// Builds the signed request each attempt is cloned from.
    async fn prepare_request(
        &self,
        metadata: &RequestMetadata,
        url: &Url,
        body: Option<&EncodedBody>,
    ) -> Result<reqwest::Request> {
        let config = &self.inner.config;

        let body = match body {
            Some(Ok(bytes)) if config.compression => Some(Bytes::from(compression::gzip(bytes)?)),
            Some(Ok(bytes)) => Some(bytes.clone()),
            Some(Err(message)) => return Err(Error::SerializationFailed(message.clone())),
            None => None,
        };

        let mut headers = HeaderMap::new();
        let user_agent = HeaderValue::try_from(config.user_agent.as_str())
            .map_err(|e| Error::ConfigurationError(format!("Invalid user agent: {}", e)))?;
        headers.insert(header::USER_AGENT, user_agent);
        if body.is_some() {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            if config.compression {
                headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            }
        }
        if config.compression {
            headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }
        for (name, value) in config.headers.iter().chain(metadata.headers.iter()) {
            headers.insert(name.clone(), value.clone());
        }

        let mut request = reqwest::Request::new(metadata.method.clone(), url.clone());
        *request.headers_mut() = headers;
        if let Some(body) = body {
            *request.body_mut() = Some(body.into());
        }

        for interceptor in &config.request_interceptors {
            interceptor
                .intercept(&mut request)
                .await
                .map_err(|source| Error::Interceptor {
                    stage: InterceptorStage::Request,
                    source,
                })?;
        }

        if let Some(signer) = &self.inner.signer {
            signer.sign(&mut request)?;
        }

        Ok(request)
    }

    /// One transport attempt, gated and fed back into the circuit breaker.
    async fn attempt(
        &self,
        template: &reqwest::Request,
        attempt: usize,
        ctx: &CallContext,
    ) -> Result<Response<Bytes>> {
        let breaker = self.inner.circuit_breaker.as_ref();
        if let Some(breaker) = breaker {
            breaker.check()?;
        }

        let result = self.transmit(template, attempt, ctx).await;

        if let Some(breaker) = breaker {
            match BreakerSignal::classify(&result) {
                Some(signal) => breaker.record(signal),
                None => breaker.abandon_probe(),
            }
        }
        result
    }

    async fn transmit(
        &self,
        template: &reqwest::Request,
        attempt: usize,
        ctx: &CallContext,
    ) -> Result<Response<Bytes>> {
        let config = &self.inner.config;
        let mut request = template.try_clone().ok_or_else(|| {
            Error::ConfigurationError("request body cannot be replayed".to_string())
        })?;

        let timeout = config.timeout_provider.timeout(config.timeout);
        if !timeout.is_zero() {
            *request.timeout_mut() = Some(timeout);
        }

        for middleware in &self.inner.middleware {
            middleware
                .before(&request)
                .map_err(|source| Error::Interceptor {
                    stage: InterceptorStage::Middleware,
                    source,
                })?;
        }

        let method = request.method().clone();
        let target = request.url().to_string();
        let started = Instant::now();
        let timestamp = SystemTime::now();

        let outcome = ctx
            .run(async {
                let response = self.inner.http.execute(request).await.map_err(transport_error)?;
                let status = response.status();
                let url = response.url().clone();
                let mut headers = response.headers().clone();
                let body = response.bytes().await.map_err(transport_error)?;
                let body = decode_body(&mut headers, body)?;
                Ok((status, headers, url, body))
            })
            .await;

        let status = outcome.as_ref().ok().map(|(status, ..)| *status);
        self.observe(AttemptRecord {
            method: method.clone(),
            url: target,
            status,
            duration: started.elapsed(),
            success: status.is_some_and(|s| s.as_u16() < 400),
            timestamp,
            attempt,
        });

        let (status, headers, url, body) = outcome?;
        if status.as_u16() >= 400 {
            log_failure(&method, &url, status, attempt);
            return Err(Error::from_status(status, &body, headers));
        }

        Ok(Response::new(body.clone(), body, status, headers, url))
    }

    fn observe(&self, record: AttemptRecord) {
        for middleware in &self.inner.middleware {
            middleware.after(&record);
        }
        self.inner.config.timeout_provider.observe(&record);
    }
}

fn log_failure(method: &Method, url: &Url, status: StatusCode, attempt: usize) {
    if status.is_server_error() {
        warn!(%method, %url, status = status.as_u16(), attempt, "Server error response");
    } else {
        error!(%method, %url, status = status.as_u16(), attempt, "Client error response");
    }
}

impl Client {
    /// Sends one request without retries, breaker, cache or load balancing.
    ///
    /// Used by batch and pipeline execution.
    pub(crate) async fn execute_direct(
        &self,
        method: Method,
        target: &str,
        body: Option<&EncodedBody>,
        ctx: &CallContext,
    ) -> Result<Bytes> {
        let config = &self.inner.config;
        let url = resolve_url(config.base_url.as_ref(), target, &[])?;

        let mut builder = self
            .inner
            .http
            .request(method.clone(), url.clone())
            .header(header::USER_AGENT, config.user_agent.as_str())
            .headers(config.headers.clone());
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout);
        }
        match body {
            Some(Ok(bytes)) => {
                builder = builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(bytes.clone());
            }
            Some(Err(message)) => return Err(Error::SerializationFailed(message.clone())),
            None => {}
        }

        ctx.run(async {
            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status();
            let mut headers = response.headers().clone();
            let body = response.bytes().await.map_err(transport_error)?;
            let body = decode_body(&mut headers, body)?;
            if status.as_u16() >= 400 {
                log_failure(&method, &url, status, 1);
                return Err(Error::from_status(status, &body, headers));
            }
            Ok(body)
        })
        .await
    }
}
