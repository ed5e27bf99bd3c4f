//! Endpoint selection across a pool of base URLs.
//!
//! A [`LoadBalancer`] is one of four strategies behind the
//! [`EndpointSelector`] interface. Every strategy is safe to share between
//! concurrent callers: selection takes a read lock on the pool, `add` and
//! `remove` take the write lock.

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Strategy tag used to construct a [`LoadBalancer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Rotate through endpoints in pool order.
    #[default]
    RoundRobin,
    /// Uniform random pick.
    Random,
    /// Random pick proportional to endpoint weight.
    WeightedRandom,
    /// Pick the endpoint with the fewest calls in flight.
    LeastConnections,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::Random => "random",
            Strategy::WeightedRandom => "weighted-random",
            Strategy::LeastConnections => "least-conn",
        })
    }
}

impl FromStr for Strategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "round-robin" | "roundrobin" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            "weighted-random" | "weighted" => Ok(Strategy::WeightedRandom),
            "least-conn" | "least-connections" => Ok(Strategy::LeastConnections),
            other => Err(crate::Error::ConfigurationError(format!(
                "unknown load balancing strategy: {other}"
            ))),
        }
    }
}

/// An endpoint picked for one call.
///
/// For least-connections the endpoint's in-flight counter is held until the
/// selection is dropped.
#[derive(Debug)]
pub struct Selection {
    endpoint: String,
    in_flight: Option<Arc<AtomicU64>>,
}

impl Selection {
    fn plain(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            in_flight: None,
        }
    }

    /// The selected base URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        if let Some(counter) = &self.in_flight {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Common interface of every selection strategy.
pub trait EndpointSelector: Send + Sync {
    /// Picks the next endpoint among those `accept` allows.
    ///
    /// Returns `None` when no pooled endpoint is acceptable.
    fn next_where(&self, accept: &dyn Fn(&str) -> bool) -> Option<Selection>;

    /// Adds an endpoint. Already pooled endpoints are ignored.
    fn add(&self, endpoint: &str);

    /// Removes an endpoint. Unknown endpoints are ignored.
    fn remove(&self, endpoint: &str);

    /// Snapshot of the pool in order.
    fn list(&self) -> Vec<String>;

    /// Picks the next endpoint, or `None` if the pool is empty.
    fn next(&self) -> Option<Selection> {
        self.next_where(&|_| true)
    }
}

/// Round-robin rotation driven by an atomic cursor.
#[derive(Debug, Default)]
pub struct RoundRobin {
    pool: RwLock<Vec<String>>,
    cursor: AtomicU64,
}

impl RoundRobin {
    pub fn new(endpoints: impl IntoIterator<Item = String>) -> Self {
        let rr = Self::default();
        endpoints.into_iter().for_each(|e| rr.add(&e));
        rr
    }
}

impl EndpointSelector for RoundRobin {
    fn next_where(&self, accept: &dyn Fn(&str) -> bool) -> Option<Selection> {
        let pool = self.pool.read();
        if pool.is_empty() {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) as usize;
        (0..pool.len())
            .map(|offset| &pool[(start.wrapping_add(offset)) % pool.len()])
            .find(|e| accept(e))
            .map(|e| Selection::plain(e))
    }

    fn add(&self, endpoint: &str) {
        let mut pool = self.pool.write();
        if !pool.iter().any(|e| e == endpoint) {
            pool.push(endpoint.to_string());
        }
    }

    fn remove(&self, endpoint: &str) {
        self.pool.write().retain(|e| e != endpoint);
    }

    fn list(&self) -> Vec<String> {
        self.pool.read().clone()
    }
}

/// Uniform random selection.
#[derive(Debug)]
pub struct RandomPick {
    pool: RwLock<Vec<String>>,
    rng: Mutex<StdRng>,
}

impl RandomPick {
    pub fn new(endpoints: impl IntoIterator<Item = String>, rng: StdRng) -> Self {
        let pick = Self {
            pool: RwLock::new(Vec::new()),
            rng: Mutex::new(rng),
        };
        endpoints.into_iter().for_each(|e| pick.add(&e));
        pick
    }
}

impl EndpointSelector for RandomPick {
    fn next_where(&self, accept: &dyn Fn(&str) -> bool) -> Option<Selection> {
        let pool = self.pool.read();
        let candidates: Vec<&String> = pool.iter().filter(|e| accept(e)).collect();
        if candidates.is_empty() {
            return None;
        }
        let index = self.rng.lock().gen_range(0..candidates.len());
        Some(Selection::plain(candidates[index]))
    }

    fn add(&self, endpoint: &str) {
        let mut pool = self.pool.write();
        if !pool.iter().any(|e| e == endpoint) {
            pool.push(endpoint.to_string());
        }
    }

    fn remove(&self, endpoint: &str) {
        self.pool.write().retain(|e| e != endpoint);
    }

    fn list(&self) -> Vec<String> {
        self.pool.read().clone()
    }
}

/// Random selection weighted by per-endpoint integer weights.
#[derive(Debug)]
pub struct WeightedRandom {
    pool: RwLock<Vec<(String, u32)>>,
    rng: Mutex<StdRng>,
}

impl WeightedRandom {
    pub fn new(endpoints: impl IntoIterator<Item = (String, u32)>, rng: StdRng) -> Self {
        let weighted = Self {
            pool: RwLock::new(Vec::new()),
            rng: Mutex::new(rng),
        };
        for (endpoint, weight) in endpoints {
            weighted.add_weighted(&endpoint, weight);
        }
        weighted
    }

    /// Adds an endpoint with an explicit weight.
    pub fn add_weighted(&self, endpoint: &str, weight: u32) {
        let mut pool = self.pool.write();
        if !pool.iter().any(|(e, _)| e == endpoint) {
            pool.push((endpoint.to_string(), weight));
        }
    }

    /// Changes the weight of a pooled endpoint.
    pub fn set_weight(&self, endpoint: &str, weight: u32) {
        if let Some(entry) = self.pool.write().iter_mut().find(|(e, _)| e == endpoint) {
            entry.1 = weight;
        }
    }
}

impl EndpointSelector for WeightedRandom {
    fn next_where(&self, accept: &dyn Fn(&str) -> bool) -> Option<Selection> {
        let pool = self.pool.read();
        let total: u64 = pool
            .iter()
            .filter(|(e, _)| accept(e))
            .map(|(_, w)| u64::from(*w))
            .sum();
        if total == 0 {
            return None;
        }

        let mut draw = self.rng.lock().gen_range(0..total);
        for (endpoint, weight) in pool.iter().filter(|(e, _)| accept(e)) {
            let weight = u64::from(*weight);
            if draw < weight {
                return Some(Selection::plain(endpoint));
            }
            draw -= weight;
        }
        None
    }

    fn add(&self, endpoint: &str) {
        self.add_weighted(endpoint, 1);
    }

    fn remove(&self, endpoint: &str) {
        self.pool.write().retain(|(e, _)| e != endpoint);
    }

    fn list(&self) -> Vec<String> {
        self.pool.read().iter().map(|(e, _)| e.clone()).collect()
    }
}

/// Selection of the endpoint with the fewest calls in flight.
#[derive(Debug, Default)]
pub struct LeastConnections {
    pool: RwLock<Vec<(String, Arc<AtomicU64>)>>,
}

impl LeastConnections {
    pub fn new(endpoints: impl IntoIterator<Item = String>) -> Self {
        let lc = Self::default();
        endpoints.into_iter().for_each(|e| lc.add(&e));
        lc
    }

    /// Calls currently in flight against `endpoint`.
    pub fn connections(&self, endpoint: &str) -> Option<u64> {
        self.pool
            .read()
            .iter()
            .find(|(e, _)| e == endpoint)
            .map(|(_, c)| c.load(Ordering::Acquire))
    }
}

impl EndpointSelector for LeastConnections {
    fn next_where(&self, accept: &dyn Fn(&str) -> bool) -> Option<Selection> {
        let pool = self.pool.read();
        loop {
            let (endpoint, counter, seen) = pool
                .iter()
                .filter(|(e, _)| accept(e))
                .map(|(e, c)| (e, c, c.load(Ordering::Acquire)))
                .min_by_key(|(_, _, seen)| *seen)?;
            // Another caller took this endpoint since the scan; look again.
            if counter
                .compare_exchange(seen, seen + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(Selection {
                    endpoint: endpoint.clone(),
                    in_flight: Some(Arc::clone(counter)),
                });
            }
        }
    }

    fn add(&self, endpoint: &str) {
        let mut pool = self.pool.write();
        if !pool.iter().any(|(e, _)| e == endpoint) {
            pool.push((endpoint.to_string(), Arc::new(AtomicU64::new(0))));
        }
    }

    fn remove(&self, endpoint: &str) {
        self.pool.write().retain(|(e, _)| e != endpoint);
    }

    fn list(&self) -> Vec<String> {
        self.pool.read().iter().map(|(e, _)| e.clone()).collect()
    }
}

/// An endpoint and its weight for weighted selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedEndpoint {
    pub url: String,
    pub weight: u32,
}

impl From<&str> for WeightedEndpoint {
    fn from(url: &str) -> Self {
        Self {
            url: url.to_string(),
            weight: 1,
        }
    }
}

impl From<String> for WeightedEndpoint {
    fn from(url: String) -> Self {
        Self { url, weight: 1 }
    }
}

impl From<(&str, u32)> for WeightedEndpoint {
    fn from((url, weight): (&str, u32)) -> Self {
        Self {
            url: url.to_string(),
            weight,
        }
    }
}

/// Load balancer configuration carried by the client config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadBalancerConfig {
    pub endpoints: Vec<WeightedEndpoint>,
    pub strategy: Strategy,
    /// Seed for the random strategies. Drawn from the OS when `None`.
    pub seed: Option<u64>,
}

impl LoadBalancerConfig {
    pub fn new<E: Into<WeightedEndpoint>>(
        endpoints: impl IntoIterator<Item = E>,
        strategy: Strategy,
    ) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            strategy,
            seed: None,
        }
    }

    /// Makes random selection reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// A pool of endpoints with one selection strategy.
///
/// # Examples
///
/// ```
/// use switchyard::load_balancer::{
///     EndpointSelector, LoadBalancer, LoadBalancerConfig, Strategy,
/// };
///
/// let lb = LoadBalancer::new(&LoadBalancerConfig::new(
///     ["http://a", "http://b"],
///     Strategy::RoundRobin,
/// ));
/// assert_eq!(lb.next().unwrap().endpoint(), "http://a");
/// assert_eq!(lb.next().unwrap().endpoint(), "http://b");
/// ```
#[derive(Debug)]
pub enum LoadBalancer {
    RoundRobin(RoundRobin),
    Random(RandomPick),
    WeightedRandom(WeightedRandom),
    LeastConnections(LeastConnections),
}

impl LoadBalancer {
    /// Builds the strategy named by `config` over its endpoints.
    pub fn new(config: &LoadBalancerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let urls = config.endpoints.iter().map(|e| e.url.clone());
        match config.strategy {
            Strategy::RoundRobin => LoadBalancer::RoundRobin(RoundRobin::new(urls)),
            Strategy::Random => LoadBalancer::Random(RandomPick::new(urls, rng)),
            Strategy::WeightedRandom => LoadBalancer::WeightedRandom(WeightedRandom::new(
                config.endpoints.iter().map(|e| (e.url.clone(), e.weight)),
                rng,
            )),
            Strategy::LeastConnections => {
                LoadBalancer::LeastConnections(LeastConnections::new(urls))
            }
        }
    }

    /// The strategy this balancer was built with.
    pub fn strategy(&self) -> Strategy {
        match self {
            LoadBalancer::RoundRobin(_) => Strategy::RoundRobin,
            LoadBalancer::Random(_) => Strategy::Random,
            LoadBalancer::WeightedRandom(_) => Strategy::WeightedRandom,
            LoadBalancer::LeastConnections(_) => Strategy::LeastConnections,
        }
    }

    /// In-flight calls for `endpoint` under least-connections.
    pub fn connections(&self, endpoint: &str) -> Option<u64> {
        match self {
            LoadBalancer::LeastConnections(lc) => lc.connections(endpoint),
            _ => None,
        }
    }

    /// Changes an endpoint's weight under weighted-random. No-op otherwise.
    pub fn set_weight(&self, endpoint: &str, weight: u32) {
        if let LoadBalancer::WeightedRandom(w) = self {
            w.set_weight(endpoint, weight);
        }
    }

    fn selector(&self) -> &dyn EndpointSelector {
        match self {
            LoadBalancer::RoundRobin(s) => s,
            LoadBalancer::Random(s) => s,
            LoadBalancer::WeightedRandom(s) => s,
            LoadBalancer::LeastConnections(s) => s,
        }
    }
}

impl EndpointSelector for LoadBalancer {
    fn next_where(&self, accept: &dyn Fn(&str) -> bool) -> Option<Selection> {
        self.selector().next_where(accept)
    }

    fn add(&self, endpoint: &str) {
        self.selector().add(endpoint);
    }

    fn remove(&self, endpoint: &str) {
        self.selector().remove(endpoint);
    }

    fn list(&self) -> Vec<String> {
        self.selector().list()
    }
}
