//! Background endpoint health probing.

use crate::background::BackgroundTask;
use crate::load_balancer::{EndpointSelector, LoadBalancer};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

/// Health checking configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Time between probe rounds.
    pub interval: Duration,
    /// Path appended to each endpoint for the probe request.
    pub path: String,
    /// Timeout for a single probe.
    pub timeout: Duration,
    /// Skip endpoints known to be unhealthy when selecting, unless all are.
    pub route_around_unhealthy: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            path: "/health".to_string(),
            timeout: Duration::from_secs(5),
            route_around_unhealthy: false,
        }
    }
}

impl HealthCheckConfig {
    pub fn new(interval: Duration, path: impl Into<String>) -> Self {
        Self {
            interval,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn route_around_unhealthy(mut self, enabled: bool) -> Self {
        self.route_around_unhealthy = enabled;
        self
    }
}

/// Last known health of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointHealth {
    pub healthy: bool,
    pub last_check: SystemTime,
    pub consecutive_failures: u32,
}

/// Probes endpoints and keeps their health status.
///
/// Endpoints come from the attached load balancer pool plus anything added
/// with [`HealthChecker::track`].
pub struct HealthChecker {
    http: reqwest::Client,
    config: HealthCheckConfig,
    pool: Option<Arc<LoadBalancer>>,
    tracked: RwLock<Vec<String>>,
    statuses: RwLock<HashMap<String, EndpointHealth>>,
}

impl HealthChecker {
    pub fn new(http: reqwest::Client, config: HealthCheckConfig) -> Self {
        Self {
            http,
            config,
            pool: None,
            tracked: RwLock::new(Vec::new()),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Probes every endpoint in `pool`, following its additions and removals.
    pub fn with_pool(mut self, pool: Arc<LoadBalancer>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    pub fn track(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        let mut tracked = self.tracked.write();
        if !tracked.contains(&endpoint) {
            tracked.push(endpoint);
        }
    }

    pub fn untrack(&self, endpoint: &str) {
        self.tracked.write().retain(|e| e != endpoint);
        self.statuses.write().remove(endpoint);
    }

    /// Every endpoint that will be probed in the next round.
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints = self.pool.as_ref().map(|p| p.list()).unwrap_or_default();
        for endpoint in self.tracked.read().iter() {
            if !endpoints.contains(endpoint) {
                endpoints.push(endpoint.clone());
            }
        }
        endpoints
    }

    pub fn status(&self, endpoint: &str) -> Option<EndpointHealth> {
        self.statuses.read().get(endpoint).copied()
    }

    /// `false` only for endpoints whose last probe failed.
    pub fn is_healthy(&self, endpoint: &str) -> bool {
        self.status(endpoint).map_or(true, |s| s.healthy)
    }

    /// Probes one endpoint and records the result.
    pub async fn check_endpoint(&self, endpoint: &str) -> bool {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), self.config.path);
        let outcome = self
            .http
            .get(&url)
            .timeout(self.config.timeout)
            .send()
            .await;

        let healthy = match &outcome {
            Ok(response) => response.status().as_u16() < 400,
            Err(_) => false,
        };
        match outcome {
            Ok(response) if !healthy => {
                tracing::warn!(endpoint, status = response.status().as_u16(), "Health probe failed")
            }
            Err(e) => tracing::warn!(endpoint, error = %e, "Health probe failed"),
            Ok(_) => tracing::debug!(endpoint, "Health probe succeeded"),
        }

        let mut statuses = self.statuses.write();
        let failures = statuses
            .get(endpoint)
            .map_or(0, |s| s.consecutive_failures);
        statuses.insert(
            endpoint.to_string(),
            EndpointHealth {
                healthy,
                last_check: SystemTime::now(),
                consecutive_failures: if healthy { 0 } else { failures.saturating_add(1) },
            },
        );
        healthy
    }

    /// Probes every endpoint concurrently.
    pub async fn check_all(&self) {
        let endpoints = self.endpoints();
        join_all(endpoints.iter().map(|e| self.check_endpoint(e))).await;
    }

    /// Starts the probe loop. The task ends when the checker is dropped.
    pub fn spawn(self: &Arc<Self>) -> Option<BackgroundTask> {
        let checker: Weak<Self> = Arc::downgrade(self);
        BackgroundTask::spawn_periodic("health-check", self.config.interval, move || {
            let checker = checker.clone();
            async move {
                if let Some(checker) = checker.upgrade() {
                    checker.check_all().await;
                }
            }
        })
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("config", &self.config)
            .field("statuses", &*self.statuses.read())
            .finish_non_exhaustive()
    }
}
