//! TTL cache for successful GET responses.

use crate::background::BackgroundTask;
use crate::policy::{AdmitAll, CacheAdmission};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Response cache configuration.
#[derive(Clone)]
pub struct CacheConfig {
    /// How long an entry stays visible after it is stored.
    pub ttl: Duration,
    /// How often expired entries are reclaimed. Independent of `ttl`.
    pub sweep_interval: Duration,
    /// Decides which responses are stored.
    pub admission: Arc<dyn CacheAdmission>,
}

impl CacheConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sweep_interval: Duration::from_secs(60),
            admission: Arc::new(AdmitAll),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_admission(mut self, admission: impl CacheAdmission + 'static) -> Self {
        self.admission = Arc::new(admission);
        self
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

/// A cached response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
struct CacheEntry {
    response: CachedResponse,
    expires_at: Instant,
}

/// Hit and miss counters plus the current entry count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// TTL store keyed by a hash of method and full URL.
///
/// Expired entries are invisible to [`ResponseCache::lookup`] and removed by
/// [`ResponseCache::sweep`].
pub struct ResponseCache {
    ttl: Duration,
    admission: Arc<dyn CacheAdmission>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl,
            admission: Arc::clone(&config.admission),
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key for a request. The URL is used exactly as given.
    pub fn key(method: &Method, url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the live entry for a GET request.
    pub fn lookup(&self, method: &Method, url: &str) -> Option<CachedResponse> {
        if method != Method::GET {
            return None;
        }

        let key = Self::key(method, url);
        let found = self
            .entries
            .read()
            .get(&key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.response.clone());

        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        tracing::debug!(url, hit = found.is_some(), "Cache lookup");
        found
    }

    /// Stores a response if it is an admissible successful GET.
    ///
    /// Returns `true` if the response was stored.
    pub fn store(&self, method: &Method, url: &str, response: CachedResponse) -> bool {
        if method != Method::GET
            || response.status.as_u16() >= 400
            || !self.admission.admit(response.status, &response.headers)
        {
            return false;
        }

        let entry = CacheEntry {
            response,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(Self::key(method, url), entry);
        true
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }

    /// Starts the periodic sweep. The task ends when the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> Option<BackgroundTask> {
        let cache: Weak<Self> = Arc::downgrade(self);
        BackgroundTask::spawn_periodic("cache-sweep", interval, move || {
            let cache = cache.clone();
            async move {
                if let Some(cache) = cache.upgrade() {
                    cache.sweep();
                }
            }
        })
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RespectCacheControl;

    fn response(status: u16, body: &'static str) -> CachedResponse {
        let mut headers = HeaderMap::new();
        headers.insert("x-test", "yes".parse().unwrap());
        CachedResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn cache() -> ResponseCache {
        ResponseCache::new(&CacheConfig::new(Duration::from_secs(60)))
    }

    #[tokio::test(start_paused = true)]
    async fn hit_before_ttl_miss_after() {
        let cache = cache();
        let url = "http://localhost/items?b=2&a=1";
        assert!(cache.store(&Method::GET, url, response(200, "cached")));

        let hit = cache.lookup(&Method::GET, url).unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"cached"));
        assert_eq!(hit.status, StatusCode::OK);
        assert_eq!(hit.headers.get("x-test").unwrap(), "yes");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.lookup(&Method::GET, url).is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, entries: 1 });
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn only_successful_gets_are_stored() {
        let cache = cache();
        assert!(!cache.store(&Method::POST, "http://localhost/", response(200, "")));
        assert!(!cache.store(&Method::GET, "http://localhost/", response(404, "")));
        assert!(cache.lookup(&Method::POST, "http://localhost/").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn query_order_is_part_of_the_key() {
        assert_ne!(
            ResponseCache::key(&Method::GET, "http://h/?a=1&b=2"),
            ResponseCache::key(&Method::GET, "http://h/?b=2&a=1")
        );
        assert_eq!(ResponseCache::key(&Method::GET, "http://h/").len(), 64);
    }

    #[test]
    fn admission_policy_applies() {
        let cache = ResponseCache::new(
            &CacheConfig::new(Duration::from_secs(60)).with_admission(RespectCacheControl),
        );
        let mut private = response(200, "secret");
        private
            .headers
            .insert("cache-control", "no-store".parse().unwrap());
        assert!(!cache.store(&Method::GET, "http://h/", private));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_expired_entries() {
        let cache = Arc::new(ResponseCache::new(
            &CacheConfig::new(Duration::from_secs(1)),
        ));
        cache.store(&Method::GET, "http://h/", response(200, "x"));
        let task = cache.spawn_sweeper(Duration::from_secs(5)).unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.stats().entries, 0);
        task.shutdown().await;
    }
}
