//! Client configuration.
//!
//! [`ClientConfig`] is a plain value: cloning it produces an independent copy
//! of every collection it owns, while policy objects and hooks are shared as
//! immutable `Arc`s. Each fluent `Client::with_*` call clones the config,
//! changes the clone and builds a new client from it.

use crate::cache::CacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::health::HealthCheckConfig;
use crate::interceptor::{RequestInterceptor, ResponseInterceptor};
use crate::load_balancer::LoadBalancerConfig;
use crate::middleware::Middleware;
use crate::policy::{FixedTimeout, TimeoutProvider};
use crate::rate_limit::RateLimitConfig;
use crate::retry::{RetryOnRetryable, RetryPredicate, RetryStrategy};
use crate::signing::SigningConfig;
use http::HeaderMap;
use reqwest::cookie::Jar;
use reqwest::{Certificate, Identity};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default user agent, `switchyard/<version>`.
pub const DEFAULT_USER_AGENT: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

/// How the transport treats redirects.
#[derive(Clone)]
pub enum RedirectPolicy {
    /// Never follow redirects; the 3xx response is returned as-is.
    None,
    /// Follow at most this many redirects.
    Limited(usize),
    /// Follow when the function approves the next URL. It also receives how
    /// many redirects were already followed.
    Custom(Arc<dyn Fn(&Url, usize) -> bool + Send + Sync>),
}

impl RedirectPolicy {
    fn to_reqwest(&self) -> reqwest::redirect::Policy {
        match self {
            RedirectPolicy::None => reqwest::redirect::Policy::none(),
            RedirectPolicy::Limited(max) => reqwest::redirect::Policy::limited(*max),
            RedirectPolicy::Custom(follow) => {
                let follow = Arc::clone(follow);
                reqwest::redirect::Policy::custom(move |attempt| {
                    if follow(attempt.url(), attempt.previous().len()) {
                        attempt.follow()
                    } else {
                        attempt.stop()
                    }
                })
            }
        }
    }
}

impl fmt::Debug for RedirectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectPolicy::None => f.write_str("None"),
            RedirectPolicy::Limited(max) => f.debug_tuple("Limited").field(max).finish(),
            RedirectPolicy::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Settings for the underlying `reqwest` transport.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// Proxy all traffic through this URL.
    pub proxy: Option<Url>,
    pub pool_max_idle_per_host: Option<usize>,
    pub pool_idle_timeout: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
    /// `None` keeps reqwest's default of ten redirects.
    pub redirect: Option<RedirectPolicy>,
    /// Stores cookies from responses and sends them back.
    pub cookie_jar: Option<Arc<Jar>>,
    /// Extra trust anchors on top of the built-in roots.
    pub root_certificates: Vec<Certificate>,
    /// Client certificate and key presented for mutual TLS.
    pub identity: Option<Identity>,
    /// Accept invalid TLS certificates. Only for testing.
    pub accept_invalid_certs: bool,
    /// A pre-built client used as-is. The settings above are ignored.
    pub custom: Option<reqwest::Client>,
}

impl TransportConfig {
    /// Builds the `reqwest` client described by this config.
    pub fn build(&self) -> crate::Result<reqwest::Client> {
        if let Some(client) = &self.custom {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        if let Some(proxy) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                crate::Error::ConfigurationError(format!("Invalid proxy: {e}"))
            })?;
            builder = builder.proxy(proxy);
        }
        if let Some(max) = self.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(max);
        }
        if let Some(timeout) = self.pool_idle_timeout {
            builder = builder.pool_idle_timeout(timeout);
        }
        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }
        if let Some(redirect) = &self.redirect {
            builder = builder.redirect(redirect.to_reqwest());
        }
        if let Some(jar) = &self.cookie_jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }
        for certificate in &self.root_certificates {
            builder = builder.add_root_certificate(certificate.clone());
        }
        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }

        builder.build().map_err(|e| {
            crate::Error::ConfigurationError(format!("Failed to build HTTP client: {e}"))
        })
    }
}

/// Every setting a [`crate::Client`] is built from.
///
/// Defaults:
///
/// | setting | default |
/// |---|---|
/// | timeout | 30s per call, zero disables it |
/// | user agent | `switchyard/<version>` |
/// | retries | exponential, 3 retries, 1s initial, x2, capped at 30s, no jitter |
/// | retry predicate | [`RetryOnRetryable`] |
/// | rate limiter, breaker, cache, load balancer, health checks | off |
/// | compression, signing, IP whitelist | off |
/// | metrics, tracing and debug hooks | off |
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: Option<Url>,
    /// Deadline for a whole call when the request sets none.
    pub timeout: Duration,
    pub user_agent: String,
    /// Headers sent with every request.
    pub headers: HeaderMap,

    pub retry_strategy: RetryStrategy,
    pub retry_predicate: Arc<dyn RetryPredicate>,
    /// Wait at least as long as a server `Retry-After` hint before retrying.
    pub respect_retry_after: bool,

    pub rate_limit: Option<RateLimitConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub cache: Option<CacheConfig>,
    pub compression: bool,

    pub load_balancer: Option<LoadBalancerConfig>,
    pub health_check: Option<HealthCheckConfig>,
    /// Clients tried in order when a call fails.
    pub backup_endpoints: Vec<Url>,

    pub signing: Option<SigningConfig>,
    pub ip_whitelist: Vec<IpAddr>,

    pub request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    pub response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub metrics: bool,
    pub tracing: bool,
    pub debug: bool,
    /// Per-attempt timeout source.
    pub timeout_provider: Arc<dyn TimeoutProvider>,

    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: HeaderMap::new(),
            retry_strategy: RetryStrategy::default(),
            retry_predicate: Arc::new(RetryOnRetryable),
            respect_retry_after: false,
            rate_limit: None,
            circuit_breaker: None,
            cache: None,
            compression: false,
            load_balancer: None,
            health_check: None,
            backup_endpoints: Vec::new(),
            signing: None,
            ip_whitelist: Vec::new(),
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
            middleware: Vec::new(),
            metrics: false,
            tracing: false,
            debug: false,
            timeout_provider: Arc::new(FixedTimeout),
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// The configuration a backup client for `base_url` is built from.
    ///
    /// Backups keep every behavior of the primary except routing: they have
    /// no load balancer, health checker or backups of their own.
    pub fn for_backup(&self, base_url: Url) -> Self {
        Self {
            base_url: Some(base_url),
            load_balancer: None,
            health_check: None,
            backup_endpoints: Vec::new(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("headers", &self.headers)
            .field("retry_strategy", &self.retry_strategy)
            .field("respect_retry_after", &self.respect_retry_after)
            .field("rate_limit", &self.rate_limit)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("cache", &self.cache)
            .field("compression", &self.compression)
            .field("load_balancer", &self.load_balancer)
            .field("health_check", &self.health_check)
            .field("backup_endpoints", &self.backup_endpoints)
            .field("signing", &self.signing)
            .field("ip_whitelist", &self.ip_whitelist)
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .field("middleware", &self.middleware.len())
            .field("metrics", &self.metrics)
            .field("tracing", &self.tracing)
            .field("debug", &self.debug)
            .field("transport", &self.transport)
            .finish()
    }
}
