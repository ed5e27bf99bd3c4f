//! Outbound rate limiting and server rate-limit hints.
//!
//! [`RateLimiter`] is a token bucket that every call waits on before it is
//! sent. [`RateLimitInfo`] is the other direction: hints a server returns in
//! `Retry-After` and `X-RateLimit-*` headers, attached to HTTP errors.

use crate::context::CallContext;
use crate::Result;
use http::HeaderMap;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Configuration for the outbound token bucket.
///
/// # Examples
///
/// ```
/// use switchyard::rate_limit::RateLimitConfig;
///
/// let config = RateLimitConfig::per_second(50).with_burst(10);
/// assert_eq!(config.requests_per_second, 50);
/// assert_eq!(config.burst, 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Tokens added to the bucket per second.
    pub requests_per_second: u32,

    /// Maximum number of tokens the bucket holds. Defaults to
    /// `requests_per_second`.
    pub burst: u32,
}

impl RateLimitConfig {
    /// Allows `rps` requests per second with a burst of the same size.
    pub fn per_second(rps: u32) -> Self {
        Self {
            requests_per_second: rps,
            burst: rps,
        }
    }

    /// Sets the bucket capacity.
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiting how fast a client sends requests.
///
/// The bucket starts full. Waiting callers sleep until enough time has passed
/// for one token to accumulate, and give up when their call context is
/// cancelled or its deadline passes.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter from a configuration.
    ///
    /// A zero rate or burst is treated as one.
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst.max(1));
        Self {
            rate: f64::from(config.requests_per_second.max(1)),
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes a token if one is available right now.
    ///
    /// On failure returns how long until the next token is available.
    pub fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }

    /// Waits until a token is available.
    ///
    /// # Errors
    ///
    /// Returns the context's cancellation error if it fires first.
    pub async fn acquire(&self, ctx: &CallContext) -> Result<()> {
        loop {
            ctx.check()?;
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis(), "Waiting for rate limiter token");
                    ctx.sleep(wait).await?;
                }
            }
        }
    }

    /// Tokens currently available, rounded down.
    pub fn available(&self) -> u32 {
        let bucket = self.bucket.lock();
        let elapsed = Instant::now()
            .duration_since(bucket.last_refill)
            .as_secs_f64();
        (bucket.tokens + elapsed * self.rate).min(self.capacity) as u32
    }
}

/// Information extracted from rate limit headers.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// When the rate limit resets (from X-RateLimit-Reset or RateLimit-Reset headers).
    pub reset_at: Option<SystemTime>,

    /// How long to wait before retrying (from Retry-After header).
    pub retry_after: Option<Duration>,

    /// Number of requests remaining in the current window.
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Extracts rate limit information from HTTP response headers.
    ///
    /// Parses `Retry-After` (seconds or HTTP date), `X-RateLimit-Reset` and
    /// `RateLimit-Reset` (Unix timestamps) and `X-RateLimit-Remaining`.
    ///
    /// # Examples
    ///
    /// ```
    /// use switchyard::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "60".parse().unwrap());
    /// headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert!(info.retry_after.is_some());
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            reset_at: parse_rate_limit_reset(headers),
            retry_after: parse_retry_after(headers),
            remaining: parse_rate_limit_remaining(headers),
        }
    }

    /// Returns the recommended delay before retrying, capped by `max_wait`.
    ///
    /// Prefers `retry_after`, otherwise calculates from `reset_at`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        if let Some(retry_after) = self.retry_after {
            return Some(retry_after.min(max_wait));
        }

        let until_reset = self.reset_at?.duration_since(SystemTime::now()).ok()?;
        Some(until_reset.min(max_wait))
    }

    /// Returns `true` if the server asked the client to slow down.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some() || self.remaining == Some(0)
    }

    /// Returns `true` if any rate limit header was present.
    pub fn has_hints(&self) -> bool {
        self.retry_after.is_some() || self.reset_at.is_some() || self.remaining.is_some()
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = headers.get("retry-after")?.to_str().ok()?;

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    httpdate::parse_http_date(header)
        .ok()?
        .duration_since(SystemTime::now())
        .ok()
}

fn parse_rate_limit_reset(headers: &HeaderMap) -> Option<SystemTime> {
    ["x-ratelimit-reset", "ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name)?.to_str().ok()?.parse::<u64>().ok())
        .map(|timestamp| UNIX_EPOCH + Duration::from_secs(timestamp))
        .next()
}

fn parse_rate_limit_remaining(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
