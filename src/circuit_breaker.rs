//! Circuit breaker gating transport attempts.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through; failures are counted.
    Closed,
    /// Requests are rejected without touching the network.
    Open,
    /// A single probe request is allowed through.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures that opens the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker config.
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration,
        }
    }
}

/// Outcome of an attempt as the breaker sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerSignal {
    /// The server answered below 400.
    Success,
    /// The server answered 4xx. Not the server's fault.
    ClientError,
    /// Transport failure, attempt timeout or 5xx.
    Failure,
}

impl BreakerSignal {
    /// Classifies an attempt result.
    ///
    /// Errors raised before the network was touched, such as cancellation,
    /// produce no signal.
    pub fn classify<T>(result: &Result<T>) -> Option<Self> {
        match result {
            Ok(_) => Some(BreakerSignal::Success),
            Err(Error::HttpError { status, .. }) if status.is_server_error() => {
                Some(BreakerSignal::Failure)
            }
            Err(Error::HttpError { .. }) => Some(BreakerSignal::ClientError),
            Err(Error::Network(_) | Error::Timeout | Error::Decompression(_)) => {
                Some(BreakerSignal::Failure)
            }
            Err(_) => None,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Three-state circuit breaker.
///
/// The gate ([`CircuitBreaker::check`]) runs before every transport attempt
/// and the outcome is fed back with [`CircuitBreaker::record`].
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state. An open circuit whose timeout elapsed reports `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.read();
        match inner.state {
            CircuitState::Open if self.open_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Consecutive failures counted while closed.
    pub fn failure_count(&self) -> u32 {
        self.inner.read().failures
    }

    /// When the last failure was recorded.
    pub fn last_failure(&self) -> Option<Instant> {
        self.inner.read().last_failure
    }

    /// Decides whether an attempt may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] while open, and while half-open with the
    /// probe already in flight.
    pub fn check(&self) -> Result<()> {
        {
            let inner = self.inner.read();
            if inner.state == CircuitState::Closed {
                return Ok(());
            }
        }

        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open if self.open_elapsed(&inner) => {
                info!("Circuit breaker half-open, allowing probe");
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                Ok(())
            }
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Ok(())
            }
            _ => {
                debug!("Circuit breaker rejected attempt");
                Err(Error::CircuitOpen)
            }
        }
    }

    /// Feeds an attempt outcome back into the breaker.
    pub fn record(&self, signal: BreakerSignal) {
        let mut inner = self.inner.write();
        match signal {
            BreakerSignal::Success | BreakerSignal::ClientError => {
                if inner.state != CircuitState::Closed {
                    info!("Circuit breaker closing");
                }
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            BreakerSignal::Failure => {
                let now = Instant::now();
                inner.last_failure = Some(now);
                match inner.state {
                    CircuitState::Closed => {
                        inner.failures = inner.failures.saturating_add(1);
                        if inner.failures >= self.config.failure_threshold {
                            warn!(failures = inner.failures, "Circuit breaker opening");
                            inner.state = CircuitState::Open;
                            inner.opened_at = Some(now);
                        }
                    }
                    CircuitState::HalfOpen => {
                        warn!("Circuit breaker probe failed, reopening");
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(now);
                        inner.probe_in_flight = false;
                    }
                    CircuitState::Open => {}
                }
            }
        }
    }

    /// Releases a half-open probe slot whose attempt never produced a signal.
    pub(crate) fn abandon_probe(&self) {
        let mut inner = self.inner.write();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        self.record(BreakerSignal::Success);
    }

    fn open_elapsed(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.open_duration)
    }
}
