//! # Switchyard - A resilient HTTP API client library
//!
//! Switchyard is a type-safe HTTP client built on top of `reqwest`. Every
//! call runs through one pipeline that composes retries with backoff, load
//! balancing across endpoints, failover to backup endpoints, response
//! caching, circuit breaking, rate limiting, compression, request signing
//! and observability hooks.
//!
//! ## Quick Start
//!
//! ```no_run
//! use switchyard::Client;
//! use switchyard::load_balancer::Strategy;
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Stock {
//!     sku: String,
//!     on_hand: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), switchyard::Error> {
//!     let inventory = Client::builder()
//!         .timeout(Duration::from_secs(5))
//!         .max_retries(2)
//!         .build()?
//!         .with_load_balancer(
//!             ["http://inv-1.internal:8080", "http://inv-2.internal:8080"],
//!             Strategy::LeastConnections,
//!         )?
//!         .with_circuit_breaker(5, Duration::from_secs(20))?;
//!
//!     let stock = inventory.get::<Stock>("/stock/SKU-1009").await?;
//!     println!("{}: {} on hand", stock.data.sku, stock.data.on_hand);
//!     println!("{:?} over {} attempts from {}", stock.latency, stock.attempts, stock.url);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Typed calls** - JSON bodies in and out, with the raw bytes always kept
//! - **Rich errors** - Status, raw body and underlying cause stay reachable
//! - **Retries** - Exponential, linear or custom backoff with pluggable predicates
//! - **Load balancing** - Round-robin, random, weighted-random, least-connections
//! - **Failover** - Backup endpoints tried in order once the primary is exhausted
//! - **Circuit breaking and rate limiting** - Per-client breaker and token bucket
//! - **Response caching** - TTL cache for GET responses with background sweeping
//! - **Cancellation** - Per-call deadlines and `CancellationToken`s honored at every wait
//! - **Batch and pipeline execution** - Concurrent fan-out and ordered streaming
//!
//! ## Deriving clients
//!
//! `with_*` methods return a new client and leave the original untouched:
//!
//! ```no_run
//! use switchyard::Client;
//! use switchyard::load_balancer::Strategy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), switchyard::Error> {
//! let base = Client::builder().base_url("https://api.example.com")?.build()?;
//!
//! let resilient = base
//!     .with_retries(5)?
//!     .with_circuit_breaker(5, Duration::from_secs(30))?
//!     .with_cache(Duration::from_secs(60))?
//!     .with_backup_endpoints(["https://backup.example.com"])?;
//!
//! let balanced = base.with_load_balancer(
//!     ["https://a.example.com", "https://b.example.com"],
//!     Strategy::RoundRobin,
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```no_run
//! use switchyard::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! match client.get::<serde_json::Value>("/orders/o-42").await {
//!     Ok(order) => println!("{}", order.data),
//!     Err(Error::CircuitOpen) => eprintln!("orders backend is tripped, not sending"),
//!     Err(e) if e.is_client_error() => eprintln!("rejected: {}", e),
//!     Err(e) if e.is_cancellation() => eprintln!("gave up waiting: {}", e),
//!     Err(Error::MaxRetriesExceeded { attempts, last_error }) => {
//!         eprintln!("{} attempts, last failure: {}", attempts, last_error);
//!     }
//!     Err(e) => eprintln!("status {:?}: {}", e.status(), e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod background;
pub mod batch;
pub mod cache;
pub mod circuit_breaker;
mod client;
pub mod compression;
pub mod config;
pub mod context;
mod dispatch;
mod error;
pub mod health;
pub mod interceptor;
pub mod load_balancer;
pub mod metadata;
pub mod middleware;
pub mod policy;
pub mod rate_limit;
mod response;
pub mod retry;
pub mod signing;

pub use batch::{BatchRequest, BatchResponse, PipelineRequest, PipelineStream};
pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use error::{BoxError, Error, InterceptorStage, Result};
pub use metadata::RequestMetadata;
pub use response::Response;
pub use retry::{RetryPredicate, RetryStrategy};
pub use tokio_util::sync::CancellationToken;

use serde::{de::DeserializeOwned, Serialize};
use std::sync::OnceLock;

static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();

/// The process-wide client with the default configuration.
///
/// Built on first use; every call returns a clone sharing the same
/// connection pool.
pub fn default_client() -> Result<Client> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        return Ok(client.clone());
    }
    let client = ClientBuilder::new().build()?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client).clone())
}

/// GET `url` with the default client.
pub async fn get<Res: DeserializeOwned>(url: impl Into<String>) -> Result<Response<Res>> {
    default_client()?.get(url).await
}

/// POST `body` as JSON to `url` with the default client.
pub async fn post<Req, Res>(url: impl Into<String>, body: &Req) -> Result<Response<Res>>
where
    Req: Serialize + ?Sized,
    Res: DeserializeOwned,
{
    default_client()?.post(url, body).await
}

/// DELETE `url` with the default client.
pub async fn delete<Res: DeserializeOwned>(url: impl Into<String>) -> Result<Response<Res>> {
    default_client()?.delete(url).await
}
