//! Pluggable decision points for caching and attempt timeouts.
//!
//! Retry-worthiness lives in [`crate::retry::RetryPredicate`]. The two other
//! decisions a call makes on the side are here: whether a response may be
//! cached ([`CacheAdmission`]) and how long a single attempt may take
//! ([`TimeoutProvider`]).

use crate::middleware::AttemptRecord;
use http::{HeaderMap, StatusCode};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a successful GET response is stored in the cache.
pub trait CacheAdmission: Send + Sync {
    /// Returns `true` if the response may be cached.
    fn admit(&self, status: StatusCode, headers: &HeaderMap) -> bool;
}

/// Caches every eligible response.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmitAll;

impl CacheAdmission for AdmitAll {
    fn admit(&self, _status: StatusCode, _headers: &HeaderMap) -> bool {
        true
    }
}

/// Skips responses marked `Cache-Control: no-store` or `private`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RespectCacheControl;

impl CacheAdmission for RespectCacheControl {
    fn admit(&self, _status: StatusCode, headers: &HeaderMap) -> bool {
        !headers
            .get_all(http::header::CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|d| d.trim().to_ascii_lowercase())
            .any(|d| d == "no-store" || d == "private")
    }
}

/// Supplies the timeout for each transport attempt.
pub trait TimeoutProvider: Send + Sync {
    /// Timeout for the next attempt given the client's configured default.
    fn timeout(&self, default: Duration) -> Duration;

    /// Learns from a finished attempt.
    fn observe(&self, _record: &AttemptRecord) {}

    /// A provider with the same settings and none of the learned state.
    ///
    /// Every client built from a configuration gets its own copy, so derived
    /// and backup clients never feed each other's history.
    fn fresh(&self) -> Arc<dyn TimeoutProvider>;
}

/// Always uses the client's configured timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTimeout;

impl TimeoutProvider for FixedTimeout {
    fn timeout(&self, default: Duration) -> Duration {
        default
    }

    fn fresh(&self) -> Arc<dyn TimeoutProvider> {
        Arc::new(FixedTimeout)
    }
}

/// Bounded ring of the most recent attempt records.
#[derive(Debug)]
pub struct AttemptHistory {
    capacity: usize,
    records: RwLock<VecDeque<AttemptRecord>>,
}

impl AttemptHistory {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends a record, evicting the oldest when full.
    pub fn push(&self, record: AttemptRecord) {
        let mut records = self.records.write();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of recorded attempts that succeeded.
    pub fn success_rate(&self) -> Option<f64> {
        let records = self.records.read();
        if records.is_empty() {
            return None;
        }
        let ok = records.iter().filter(|r| r.success).count();
        Some(ok as f64 / records.len() as f64)
    }

    /// The `q` quantile (0.0 to 1.0) of successful attempt durations.
    pub fn quantile(&self, q: f64) -> Option<Duration> {
        let mut durations: Vec<Duration> = self
            .records
            .read()
            .iter()
            .filter(|r| r.success)
            .map(|r| r.duration)
            .collect();
        if durations.is_empty() {
            return None;
        }
        durations.sort_unstable();
        let rank = (q.clamp(0.0, 1.0) * (durations.len() - 1) as f64).round() as usize;
        Some(durations[rank])
    }

    fn successes(&self) -> usize {
        self.records.read().iter().filter(|r| r.success).count()
    }
}

impl Default for AttemptHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Attempt timeout derived from the p95 of recent successful attempts.
///
/// Until `min_samples` successes have been seen the client default is used.
/// Afterwards the timeout is `p95 * multiplier` clamped to `[min, max]`.
#[derive(Debug)]
pub struct AdaptiveTimeout {
    history: AttemptHistory,
    multiplier: f64,
    min: Duration,
    max: Duration,
    min_samples: usize,
}

impl AdaptiveTimeout {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            history: AttemptHistory::default(),
            multiplier: 2.0,
            min,
            max: max.max(min),
            min_samples: 20,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_min_samples(mut self, samples: usize) -> Self {
        self.min_samples = samples;
        self
    }

    pub fn history(&self) -> &AttemptHistory {
        &self.history
    }
}

impl TimeoutProvider for AdaptiveTimeout {
    fn timeout(&self, default: Duration) -> Duration {
        if self.history.successes() < self.min_samples {
            return default;
        }
        match self.history.quantile(0.95) {
            Some(p95) => p95
                .mul_f64(self.multiplier.max(0.0))
                .clamp(self.min, self.max),
            None => default,
        }
    }

    fn observe(&self, record: &AttemptRecord) {
        self.history.push(record.clone());
    }

    fn fresh(&self) -> Arc<dyn TimeoutProvider> {
        Arc::new(Self {
            history: AttemptHistory::new(self.history.capacity),
            multiplier: self.multiplier,
            min: self.min,
            max: self.max,
            min_samples: self.min_samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn record(ms: u64, success: bool) -> AttemptRecord {
        AttemptRecord {
            method: http::Method::GET,
            url: "http://localhost/".to_string(),
            status: success.then_some(StatusCode::OK),
            duration: Duration::from_millis(ms),
            success,
            timestamp: SystemTime::now(),
            attempt: 1,
        }
    }

    #[test]
    fn cache_control_admission() {
        let mut headers = HeaderMap::new();
        assert!(RespectCacheControl.admit(StatusCode::OK, &headers));
        headers.insert("cache-control", "max-age=60, Private".parse().unwrap());
        assert!(!RespectCacheControl.admit(StatusCode::OK, &headers));
        assert!(AdmitAll.admit(StatusCode::OK, &headers));
    }

    #[test]
    fn history_is_bounded() {
        let history = AttemptHistory::new(3);
        for ms in [10, 20, 30, 40] {
            history.push(record(ms, true));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.quantile(0.0), Some(Duration::from_millis(20)));
        history.push(record(1, false));
        assert_eq!(history.success_rate(), Some(2.0 / 3.0));
    }

    #[test]
    fn adaptive_timeout_uses_default_until_warm() {
        let provider = AdaptiveTimeout::new(Duration::from_millis(50), Duration::from_secs(5))
            .with_min_samples(5);
        let default = Duration::from_secs(30);
        for _ in 0..4 {
            provider.observe(&record(100, true));
        }
        assert_eq!(provider.timeout(default), default);

        provider.observe(&record(100, true));
        assert_eq!(provider.timeout(default), Duration::from_millis(200));
    }

    #[test]
    fn adaptive_timeout_is_clamped() {
        let provider = AdaptiveTimeout::new(Duration::from_millis(500), Duration::from_secs(1))
            .with_min_samples(1);
        provider.observe(&record(10, true));
        assert_eq!(provider.timeout(Duration::from_secs(30)), Duration::from_millis(500));
        for _ in 0..10 {
            provider.observe(&record(5_000, true));
        }
        assert_eq!(provider.timeout(Duration::from_secs(30)), Duration::from_secs(1));
    }

    #[test]
    fn fresh_adaptive_timeout_forgets_history() {
        let provider = AdaptiveTimeout::new(Duration::from_millis(10), Duration::from_secs(5))
            .with_min_samples(1);
        provider.observe(&record(300, true));
        assert_eq!(provider.timeout(Duration::from_secs(30)), Duration::from_millis(600));

        let copy = provider.fresh();
        assert_eq!(copy.timeout(Duration::from_secs(30)), Duration::from_secs(30));
        copy.observe(&record(50, true));
        assert_eq!(copy.timeout(Duration::from_secs(30)), Duration::from_millis(100));
        assert_eq!(provider.history().len(), 1);
    }
}
