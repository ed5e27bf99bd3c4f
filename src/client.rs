//! HTTP client with retries, load balancing, failover, caching and circuit
//! breaking.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! Use [`ClientBuilder`] to configure and create clients, or derive a new
//! client from an existing one with the `with_*` methods.

use crate::{
    access::IpWhitelist,
    background::BackgroundTask,
    batch::{BatchRequest, PipelineRequest},
    cache::{CacheConfig, ResponseCache},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    config::{ClientConfig, RedirectPolicy},
    health::{HealthCheckConfig, HealthChecker},
    interceptor::{RequestInterceptor, ResponseInterceptor},
    load_balancer::{LoadBalancer, LoadBalancerConfig, Strategy},
    metadata::RequestMetadata,
    middleware::{
        DebugMiddleware, MetricsMiddleware, MetricsSnapshot, Middleware, TracingMiddleware,
    },
    policy::TimeoutProvider,
    rate_limit::{RateLimitConfig, RateLimiter},
    retry::{RetryPolicy, RetryPredicate, RetryStrategy},
    signing::{RequestSigner, SigningConfig},
    Error, Response, Result,
};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use reqwest::cookie::Jar;
use reqwest::{Certificate, Identity};
use serde::{de::DeserializeOwned, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// An HTTP client that routes every call through the configured resilience
/// layers.
///
/// The client is cheap to clone and designed to be reused. Clones share
/// state (connection pool, breaker, cache, load balancer cursor); clients
/// derived with `with_*` share nothing with their parent.
///
/// # Examples
///
/// ```no_run
/// use switchyard::{Client, Response, RetryStrategy};
/// use std::time::Duration;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct NewShipment<'a> {
///     order: &'a str,
///     carrier: &'a str,
/// }
///
/// #[derive(Deserialize)]
/// struct Shipment {
///     id: String,
///     state: String,
/// }
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let client = Client::builder()
///     .base_url("https://shipping.internal")?
///     .timeout(Duration::from_secs(5))
///     .retry_strategy(RetryStrategy::Linear {
///         delay: Duration::from_millis(250),
///         max_retries: 2,
///     })
///     .build()?;
///
/// let shipment: Response<Shipment> = client.get("/shipments/s-881").await?;
/// println!("{} is {}", shipment.data.id, shipment.data.state);
///
/// let created: Response<Shipment> = client
///     .post("/shipments", &NewShipment { order: "o-42", carrier: "dhl" })
///     .await?;
/// println!("took {:?} over {} attempts", created.latency, created.attempts);
///
/// // A variant with a backup endpoint; `client` is unchanged
/// let resilient = client.with_backup_endpoints(["https://backup.example.com"])?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) http: reqwest::Client,
    pub(crate) retry: RetryPolicy,
    pub(crate) rate_limiter: Option<RateLimiter>,
    pub(crate) circuit_breaker: Option<CircuitBreaker>,
    pub(crate) cache: Option<Arc<ResponseCache>>,
    pub(crate) load_balancer: Option<Arc<LoadBalancer>>,
    pub(crate) health: Option<Arc<HealthChecker>>,
    pub(crate) signer: Option<RequestSigner>,
    pub(crate) whitelist: IpWhitelist,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) metrics: Option<Arc<MetricsMiddleware>>,
    pub(crate) backups: Vec<Client>,
    _tasks: Vec<BackgroundTask>,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use switchyard::Client;
    ///
    /// # async fn example() -> Result<(), switchyard::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client with the default configuration.
    pub fn new() -> Result<Self> {
        ClientBuilder::new().build()
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// A builder seeded with a copy of this client's configuration.
    pub fn to_builder(&self) -> ClientBuilder {
        ClientBuilder::from_config(self.inner.config.clone())
    }

    fn derive(
        &self,
        change: impl FnOnce(ClientBuilder) -> Result<ClientBuilder>,
    ) -> Result<Client> {
        change(self.to_builder())?.build()
    }

    /// Makes a typed HTTP request.
    ///
    /// Serializes `body` as JSON, sends it through [`Client::send`] and
    /// deserializes the response body.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use switchyard::{Client, RequestMetadata};
    /// use http::Method;
    /// use serde::Deserialize;
    /// use std::time::Duration;
    ///
    /// #[derive(Deserialize)]
    /// struct Quote { cents: u64 }
    ///
    /// # async fn example() -> Result<(), switchyard::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://pricing.internal")?
    ///     .build()?;
    ///
    /// let metadata = RequestMetadata::new(Method::PUT, "/quotes/o-42")
    ///     .with_query_param("currency", "EUR")
    ///     .with_timeout(Duration::from_secs(2));
    ///
    /// let quote = client
    ///     .call::<_, Quote>(metadata, Some(&serde_json::json!({ "items": 3 })))
    ///     .await?;
    /// println!("{} cents", quote.data.cents);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Req, Res>(
        &self,
        metadata: RequestMetadata,
        body: Option<&Req>,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send(metadata, body).await?.into_json()
    }

    /// Makes a GET request to the specified path.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::GET, path);
        self.call::<(), Res>(metadata, None).await
    }

    /// Makes a POST request to the specified path with a JSON body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::POST, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a PUT request to the specified path with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PUT, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a PATCH request to the specified path with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PATCH, path);
        self.call(metadata, Some(body)).await
    }

    /// Makes a DELETE request to the specified path.
    ///
    /// An empty response body deserializes as JSON `null`, so `()` and
    /// `Option<T>` work for `204 No Content`.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::DELETE, path);
        self.call::<(), Res>(metadata, None).await
    }

    /// Makes a HEAD request and returns the raw response.
    pub async fn head(&self, path: impl Into<String>) -> Result<Response<Bytes>> {
        self.send::<()>(RequestMetadata::new(Method::HEAD, path), None)
            .await
    }

    /// Makes an OPTIONS request and returns the raw response.
    pub async fn options(&self, path: impl Into<String>) -> Result<Response<Bytes>> {
        self.send::<()>(RequestMetadata::new(Method::OPTIONS, path), None)
            .await
    }

    /// Starts a batch of concurrent requests.
    pub fn batch(&self) -> BatchRequest {
        BatchRequest::new(self.clone())
    }

    /// Starts a pipeline of sequential requests.
    pub fn pipeline(&self) -> PipelineRequest {
        PipelineRequest::new(self.clone())
    }

    pub fn load_balancer(&self) -> Option<&Arc<LoadBalancer>> {
        self.inner.load_balancer.as_ref()
    }

    pub fn health(&self) -> Option<&Arc<HealthChecker>> {
        self.inner.health.as_ref()
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.inner.circuit_breaker.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.inner.cache.as_ref()
    }

    /// Attempt counters, when metrics are enabled.
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.inner.metrics.as_ref().map(|m| m.snapshot())
    }

    /// Backup clients tried in order when a call fails.
    pub fn backups(&self) -> &[Client] {
        &self.inner.backups
    }

    pub fn with_base_url(&self, url: impl AsRef<str>) -> Result<Client> {
        self.derive(|b| b.base_url(url))
    }

    pub fn with_timeout(&self, timeout: Duration) -> Result<Client> {
        self.derive(|b| Ok(b.timeout(timeout)))
    }

    /// Sets the number of retries, keeping the current backoff shape.
    pub fn with_retries(&self, max_retries: usize) -> Result<Client> {
        self.derive(|b| Ok(b.max_retries(max_retries)))
    }

    pub fn with_retry_strategy(&self, strategy: RetryStrategy) -> Result<Client> {
        self.derive(|b| Ok(b.retry_strategy(strategy)))
    }

    pub fn with_header(&self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Client> {
        self.derive(|b| b.default_header(name, value))
    }

    pub fn with_headers(&self, headers: HeaderMap) -> Result<Client> {
        self.derive(|b| Ok(b.headers(headers)))
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_auth(&self, token: impl AsRef<str>) -> Result<Client> {
        self.derive(|b| b.bearer_auth(token))
    }

    /// Sends `X-API-Key: <key>` with every request.
    pub fn with_api_key(&self, key: impl AsRef<str>) -> Result<Client> {
        self.derive(|b| b.default_header("X-API-Key", key))
    }

    pub fn with_user_agent(&self, user_agent: impl Into<String>) -> Result<Client> {
        self.derive(|b| Ok(b.user_agent(user_agent)))
    }

    pub fn with_rate_limiter(&self, requests_per_second: u32, burst: u32) -> Result<Client> {
        let config = RateLimitConfig::per_second(requests_per_second).with_burst(burst);
        self.derive(|b| Ok(b.rate_limit(config)))
    }

    pub fn with_circuit_breaker(
        &self,
        failure_threshold: u32,
        open_duration: Duration,
    ) -> Result<Client> {
        let config = CircuitBreakerConfig::new(failure_threshold, open_duration);
        self.derive(|b| Ok(b.circuit_breaker(config)))
    }

    pub fn with_cache(&self, ttl: Duration) -> Result<Client> {
        self.derive(|b| Ok(b.cache(CacheConfig::new(ttl))))
    }

    pub fn with_metrics(&self) -> Result<Client> {
        self.derive(|b| Ok(b.metrics(true)))
    }

    pub fn with_tracing(&self) -> Result<Client> {
        self.derive(|b| Ok(b.tracing(true)))
    }

    pub fn with_debug(&self) -> Result<Client> {
        self.derive(|b| Ok(b.debug(true)))
    }

    pub fn with_load_balancer<E: AsRef<str>>(
        &self,
        endpoints: impl IntoIterator<Item = E>,
        strategy: Strategy,
    ) -> Result<Client> {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.as_ref().to_string())
            .collect();
        self.derive(|b| Ok(b.load_balancer(LoadBalancerConfig::new(endpoints, strategy))))
    }

    pub fn with_health_check(&self, interval: Duration, path: impl Into<String>) -> Result<Client> {
        self.derive(|b| Ok(b.health_check(HealthCheckConfig::new(interval, path))))
    }

    pub fn with_compression(&self) -> Result<Client> {
        self.derive(|b| Ok(b.compression(true)))
    }

    pub fn with_request_signing(
        &self,
        key_id: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Result<Client> {
        self.derive(|b| Ok(b.request_signing(key_id, private_key_pem)))
    }

    pub fn with_ip_whitelist(&self, addresses: impl IntoIterator<Item = IpAddr>) -> Result<Client> {
        self.derive(|b| Ok(b.ip_whitelist(addresses)))
    }

    pub fn with_request_interceptor(
        &self,
        interceptor: impl RequestInterceptor + 'static,
    ) -> Result<Client> {
        self.derive(|b| Ok(b.request_interceptor(interceptor)))
    }

    pub fn with_response_interceptor(
        &self,
        interceptor: impl ResponseInterceptor + 'static,
    ) -> Result<Client> {
        self.derive(|b| Ok(b.response_interceptor(interceptor)))
    }

    pub fn with_middleware(&self, middleware: impl Middleware + 'static) -> Result<Client> {
        self.derive(|b| Ok(b.middleware(middleware)))
    }

    pub fn with_backup_endpoints<E: AsRef<str>>(
        &self,
        endpoints: impl IntoIterator<Item = E>,
    ) -> Result<Client> {
        self.derive(|b| b.backup_endpoints(endpoints))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use switchyard::{ClientBuilder, RetryStrategy};
/// use switchyard::load_balancer::{LoadBalancerConfig, Strategy};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let client = ClientBuilder::new()
///     .timeout(Duration::from_secs(10))
///     .retry_strategy(RetryStrategy::exponential(2))
///     .load_balancer(LoadBalancerConfig::new(
///         ["https://a.example.com", "https://b.example.com"],
///         Strategy::LeastConnections,
///     ))
///     .default_header("X-Client", "inventory-sync")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Sets the base URL relative paths are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.config.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.config.headers.insert(name, value);
        Ok(self)
    }

    /// Merges `headers` into the default headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in &headers {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Result<Self> {
        self.default_header("Authorization", format!("Bearer {}", token.as_ref()))
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Sets the deadline for a whole call. Zero disables it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the retry strategy for failed requests.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.config.retry_strategy = strategy;
        self
    }

    /// Sets the number of retries, keeping the current backoff shape.
    pub fn max_retries(mut self, retries: usize) -> Self {
        match &mut self.config.retry_strategy {
            RetryStrategy::ExponentialBackoff { max_retries, .. }
            | RetryStrategy::Linear { max_retries, .. } => *max_retries = retries,
            other => *other = RetryStrategy::exponential(retries),
        }
        self
    }

    /// Sets a custom retry predicate.
    ///
    /// By default, requests are retried based on `Error::is_retryable()`.
    /// Client errors (4xx) are never retried regardless of the predicate.
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.config.retry_predicate = Arc::from(predicate);
        self
    }

    /// Waits at least as long as a server `Retry-After` hint before retrying.
    pub fn respect_retry_after(mut self, enabled: bool) -> Self {
        self.config.respect_retry_after = enabled;
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = Some(config);
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.config.cache = Some(config);
        self
    }

    /// Gzips request bodies and asks for gzip responses.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.compression = enabled;
        self
    }

    pub fn load_balancer(mut self, config: LoadBalancerConfig) -> Self {
        self.config.load_balancer = Some(config);
        self
    }

    pub fn health_check(mut self, config: HealthCheckConfig) -> Self {
        self.config.health_check = Some(config);
        self
    }

    /// Replaces the backup endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if any endpoint is not a valid URL.
    pub fn backup_endpoints<E: AsRef<str>>(
        mut self,
        endpoints: impl IntoIterator<Item = E>,
    ) -> Result<Self> {
        self.config.backup_endpoints = endpoints
            .into_iter()
            .map(|e| Url::parse(e.as_ref()))
            .collect::<std::result::Result<_, _>>()?;
        Ok(self)
    }

    /// Signs every request with an RSA key in PEM form. The key is validated
    /// by [`ClientBuilder::build`].
    pub fn request_signing(
        mut self,
        key_id: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        self.config.signing = Some(SigningConfig {
            key_id: key_id.into(),
            private_key_pem: private_key_pem.into(),
        });
        self
    }

    pub fn ip_whitelist(mut self, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        self.config.ip_whitelist = addresses.into_iter().collect();
        self
    }

    pub fn request_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.config.request_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn response_interceptor(mut self, interceptor: impl ResponseInterceptor + 'static) -> Self {
        self.config.response_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.config.middleware.push(Arc::new(middleware));
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.metrics = enabled;
        self
    }

    pub fn tracing(mut self, enabled: bool) -> Self {
        self.config.tracing = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    pub fn timeout_provider(mut self, provider: impl TimeoutProvider + 'static) -> Self {
        self.config.timeout_provider = Arc::new(provider);
        self
    }

    /// Routes all traffic through a proxy.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn proxy(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.config.transport.proxy = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.transport.pool_max_idle_per_host = Some(max);
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.pool_idle_timeout = Some(timeout);
        self
    }

    pub fn tcp_keepalive(mut self, interval: Duration) -> Self {
        self.config.transport.tcp_keepalive = Some(interval);
        self
    }

    /// Follows at most `max` redirects. Zero disables redirects.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.transport.redirect = Some(match max {
            0 => RedirectPolicy::None,
            n => RedirectPolicy::Limited(n),
        });
        self
    }

    /// Follows a redirect only when `follow(next_url, redirects_so_far)`
    /// returns `true`. Otherwise the 3xx response is returned.
    pub fn redirect_policy<F>(mut self, follow: F) -> Self
    where
        F: Fn(&Url, usize) -> bool + Send + Sync + 'static,
    {
        self.config.transport.redirect = Some(RedirectPolicy::Custom(Arc::new(follow)));
        self
    }

    /// Keeps cookies in `jar`: `Set-Cookie` responses fill it and matching
    /// cookies are sent back. Share the jar to read or seed it.
    pub fn cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.config.transport.cookie_jar = Some(jar);
        self
    }

    /// Trusts the PEM certificate as an additional root.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM cannot be read.
    pub fn add_root_certificate(mut self, pem: &[u8]) -> Result<Self> {
        let certificate = Certificate::from_pem(pem)
            .map_err(|e| Error::ConfigurationError(format!("Invalid root certificate: {e}")))?;
        self.config.transport.root_certificates.push(certificate);
        Ok(self)
    }

    /// Presents a client certificate for mutual TLS. `pem` holds the
    /// certificate chain and the private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM has no usable certificate and key.
    pub fn identity(mut self, pem: &[u8]) -> Result<Self> {
        let identity = Identity::from_pem(pem)
            .map_err(|e| Error::ConfigurationError(format!("Invalid client identity: {e}")))?;
        self.config.transport.identity = Some(identity);
        Ok(self)
    }

    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.transport.accept_invalid_certs = accept;
        self
    }

    /// Uses a pre-built `reqwest` client for transport.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.config.transport.custom = Some(client);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// Background tasks (cache sweeping, health checks) are started on the
    /// current Tokio runtime and stop when the last clone of the client is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport, a load balancer endpoint, a backup
    /// endpoint, the signing key or a background interval is invalid.
    pub fn build(self) -> Result<Client> {
        let mut config = self.config;
        if config.cache.as_ref().is_some_and(|c| c.sweep_interval.is_zero()) {
            return Err(Error::ConfigurationError(
                "cache sweep interval must be greater than zero".to_string(),
            ));
        }
        if config.health_check.as_ref().is_some_and(|h| h.interval.is_zero()) {
            return Err(Error::ConfigurationError(
                "health check interval must be greater than zero".to_string(),
            ));
        }
        config.timeout_provider = config.timeout_provider.fresh();
        let http = config.transport.build()?;

        let signer = config
            .signing
            .as_ref()
            .map(RequestSigner::from_config)
            .transpose()?;

        let load_balancer = match &config.load_balancer {
            Some(lb) => {
                for endpoint in &lb.endpoints {
                    Url::parse(&endpoint.url)?;
                }
                Some(Arc::new(LoadBalancer::new(lb)))
            }
            None => None,
        };

        let mut tasks = Vec::new();

        let cache = config.cache.as_ref().map(|c| {
            let cache = Arc::new(ResponseCache::new(c));
            tasks.extend(cache.spawn_sweeper(c.sweep_interval));
            cache
        });

        let health = config.health_check.clone().map(|hc| {
            let mut checker = HealthChecker::new(http.clone(), hc);
            if let Some(lb) = &load_balancer {
                checker = checker.with_pool(Arc::clone(lb));
            } else if let Some(base) = &config.base_url {
                checker.track(base.as_str());
            }
            let checker = Arc::new(checker);
            tasks.extend(checker.spawn());
            checker
        });

        let metrics = config.metrics.then(MetricsMiddleware::new);
        let mut middleware: Vec<Arc<dyn Middleware>> = Vec::new();
        if let Some(metrics) = &metrics {
            middleware.push(metrics.clone());
        }
        if config.tracing {
            middleware.push(Arc::new(TracingMiddleware));
        }
        if config.debug {
            middleware.push(Arc::new(DebugMiddleware));
        }
        middleware.extend(config.middleware.iter().cloned());

        let backups = config
            .backup_endpoints
            .iter()
            .map(|url| ClientBuilder::from_config(config.for_backup(url.clone())).build())
            .collect::<Result<Vec<_>>>()?;

        let retry = RetryPolicy::new(
            config.retry_strategy.clone(),
            Arc::clone(&config.retry_predicate),
            config.respect_retry_after,
        );

        tracing::debug!(
            base_url = config.base_url.as_ref().map(Url::as_str),
            backups = backups.len(),
            load_balanced = load_balancer.is_some(),
            "Built HTTP client"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                http,
                retry,
                rate_limiter: config.rate_limit.map(RateLimiter::new),
                circuit_breaker: config.circuit_breaker.map(CircuitBreaker::new),
                cache,
                load_balancer,
                health,
                signer,
                whitelist: IpWhitelist::new(config.ip_whitelist.iter().copied()),
                middleware,
                metrics,
                backups,
                _tasks: tasks,
                config,
            }),
        })
    }
}
