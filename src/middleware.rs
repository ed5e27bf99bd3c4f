//! Observability hooks around every transport attempt.
//!
//! Middleware is registered at client construction and stays fixed for the
//! client's lifetime. `before` runs just ahead of each attempt and may reject
//! it; `after` sees the outcome of every attempt, including failed ones.

use crate::error::BoxError;
use http::{Method, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// What happened during one transport attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub method: Method,
    pub url: String,
    /// Response status, if the server answered.
    pub status: Option<StatusCode>,
    pub duration: Duration,
    /// `true` when the server answered below 400.
    pub success: bool,
    pub timestamp: SystemTime,
    /// 1-indexed attempt number within the call.
    pub attempt: usize,
}

/// Hook pair invoked around each transport attempt.
pub trait Middleware: Send + Sync {
    /// Runs before the attempt. An error aborts the call.
    fn before(&self, _request: &reqwest::Request) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs after the attempt finishes.
    fn after(&self, _record: &AttemptRecord) {}
}

/// Emits a `tracing` event for every attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn before(&self, request: &reqwest::Request) -> Result<(), BoxError> {
        tracing::info!(method = %request.method(), url = %request.url(), "HTTP request started");
        Ok(())
    }

    fn after(&self, record: &AttemptRecord) {
        tracing::info!(
            method = %record.method,
            url = %record.url,
            status = record.status.map(|s| s.as_u16()),
            latency_ms = record.duration.as_millis(),
            attempt = record.attempt,
            success = record.success,
            "HTTP request finished"
        );
    }
}

/// Logs request headers and attempt outcomes at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugMiddleware;

impl Middleware for DebugMiddleware {
    fn before(&self, request: &reqwest::Request) -> Result<(), BoxError> {
        tracing::trace!(
            method = %request.method(),
            url = %request.url(),
            headers = ?request.headers(),
            body_len = request.body().and_then(|b| b.as_bytes()).map(|b| b.len()),
            "Outgoing request"
        );
        Ok(())
    }

    fn after(&self, record: &AttemptRecord) {
        tracing::trace!(?record, "Attempt record");
    }
}

/// Point-in-time copy of the metrics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub success: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    /// Attempts that never got a status (network errors, timeouts).
    pub transport_errors: u64,
    pub total_latency: Duration,
}

impl MetricsSnapshot {
    /// Mean attempt latency, or zero before any attempt.
    pub fn average_latency(&self) -> Duration {
        match u32::try_from(self.total) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_latency / n,
            Err(_) => Duration::from_nanos(
                (self.total_latency.as_nanos() / u128::from(self.total)) as u64,
            ),
        }
    }
}

/// Counts attempts by outcome using atomic counters.
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    total: AtomicU64,
    success: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    transport_errors: AtomicU64,
    latency_micros: AtomicU64,
}

impl MetricsMiddleware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(self.latency_micros.load(Ordering::Relaxed)),
        }
    }
}

impl Middleware for MetricsMiddleware {
    fn after(&self, record: &AttemptRecord) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(record.duration.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);

        let counter = match record.status {
            Some(s) if s.is_server_error() => &self.server_errors,
            Some(s) if s.is_client_error() => &self.client_errors,
            Some(_) => &self.success,
            None => &self.transport_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn before(&self, request: &reqwest::Request) -> Result<(), BoxError> {
        (**self).before(request)
    }

    fn after(&self, record: &AttemptRecord) {
        (**self).after(record)
    }
}
