//! Retry strategies and predicates for handling transient failures.
//!
//! [`RetryPolicy`] drives the attempt loop: client errors (4xx) stop it
//! immediately, a [`RetryPredicate`] decides whether anything else is worth
//! another attempt, and a [`RetryStrategy`] supplies the delay in between.

use crate::context::CallContext;
use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Defines when and how to retry failed requests.
///
/// # Examples
///
/// ```
/// use switchyard::RetryStrategy;
/// use std::time::Duration;
///
/// // 1s, 2s, 4s: the client default
/// assert_eq!(RetryStrategy::default().max_retries(), Some(3));
///
/// // 250ms, 750ms, 2s (capped)
/// let steep = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(250),
///     multiplier: 3.0,
///     max_delay: Duration::from_secs(2),
///     max_retries: 3,
///     jitter: false,
/// };
/// assert_eq!(steep.delay_for_attempt(3), Some(Duration::from_secs(2)));
///
/// // Give up after the first failure
/// assert_eq!(RetryStrategy::None.delay_for_attempt(1), None);
/// ```
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Do not retry failed requests.
    None,

    /// Retry with exponentially increasing delays.
    ///
    /// Retry `n` waits `initial_delay * multiplier^(n-1)`, capped at `max_delay`.
    /// Optional jitter scales each delay by a random factor in `[0.5, 1.0]`.
    ExponentialBackoff {
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Growth factor between consecutive delays.
        multiplier: f64,
        /// Ceiling for any single delay.
        max_delay: Duration,
        /// Retries allowed after the first attempt.
        max_retries: usize,
        jitter: bool,
    },

    /// Retry with a fixed delay between attempts.
    Linear {
        delay: Duration,
        /// Retries allowed after the first attempt.
        max_retries: usize,
    },

    /// Delays computed by a function of the 1-indexed retry number.
    Custom {
        /// Returns `None` to stop retrying.
        delay_fn: fn(attempt: usize) -> Option<Duration>,
    },
}

impl RetryStrategy {
    /// Delay before retry number `attempt` (1 = first retry), or `None`
    /// once the strategy is exhausted.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                multiplier,
                max_delay,
                max_retries,
                jitter,
            } => {
                if attempt > *max_retries {
                    return None;
                }

                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let factor = multiplier.max(0.0).powi(exponent);
                let delay = Duration::try_from_secs_f64(initial_delay.as_secs_f64() * factor)
                    .unwrap_or(*max_delay)
                    .min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Some(delay.mul_f64(jitter_factor))
                } else {
                    Some(delay)
                }
            }
            RetryStrategy::Linear { delay, max_retries } => {
                if attempt > *max_retries {
                    None
                } else {
                    Some(*delay)
                }
            }
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }

    /// Exponential backoff with the client defaults and `max_retries` retries.
    pub fn exponential(max_retries: usize) -> Self {
        RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_retries,
            jitter: false,
        }
    }

    /// Upper bound applied to server `Retry-After` hints.
    pub fn max_delay(&self) -> Duration {
        match self {
            RetryStrategy::ExponentialBackoff { max_delay, .. } => *max_delay,
            _ => MAX_RETRY_AFTER,
        }
    }

    /// Retry budget, or `None` when a custom function decides.
    pub fn max_retries(&self) -> Option<usize> {
        match self {
            RetryStrategy::None => Some(0),
            RetryStrategy::ExponentialBackoff { max_retries, .. } => Some(*max_retries),
            RetryStrategy::Linear { max_retries, .. } => Some(*max_retries),
            RetryStrategy::Custom { .. } => None,
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::exponential(3)
    }
}

/// Cap on `Retry-After` waits for strategies without a maximum delay.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Decides whether a failed attempt is worth another try.
///
/// Client errors (4xx) and cancellations never reach the predicate; they end
/// the call immediately.
///
/// # Examples
///
/// ```
/// use switchyard::{Error, RetryPredicate};
///
/// /// Only gateway failures are transient for this backend.
/// struct RetryOnGatewayErrors;
///
/// impl RetryPredicate for RetryOnGatewayErrors {
///     fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
///         matches!(error.status().map(|s| s.as_u16()), Some(502..=504))
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// `attempt` is the 1-indexed number of the attempt that just failed.
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

/// Retries whatever [`Error::is_retryable`] accepts. The client default.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Retry only on 5xx server errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

impl RetryPredicate for RetryOn5xx {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::HttpError { status, .. } if status.is_server_error())
    }
}

/// Retry only on timeout errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Timeout)
    }
}

/// Retry only when the transport failed before a response arrived.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnConnectionError;

impl RetryPredicate for RetryOnConnectionError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Network(e) if e.is_connect() || e.is_request() || e.is_body())
    }
}

/// Retries when any inner predicate does.
///
/// ```
/// use switchyard::retry::{OrPredicate, RetryOnConnectionError, RetryOnTimeout};
///
/// let transport_only = OrPredicate::new(vec![
///     Box::new(RetryOnConnectionError),
///     Box::new(RetryOnTimeout),
/// ]);
/// ```
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry(error, attempt))
    }
}

/// Retries only when every inner predicate agrees.
///
/// ```
/// use switchyard::retry::{AndPredicate, RetryOn5xx};
/// use switchyard::{Error, RetryPredicate};
///
/// struct FirstTry;
///
/// impl RetryPredicate for FirstTry {
///     fn should_retry(&self, _error: &Error, attempt: usize) -> bool {
///         attempt == 1
///     }
/// }
///
/// // one more go after a 5xx, never two
/// let once_on_5xx = AndPredicate::new(vec![Box::new(RetryOn5xx), Box::new(FirstTry)]);
/// ```
pub struct AndPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AndPredicate {
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AndPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .all(|p| p.should_retry(error, attempt))
    }
}

impl<P: RetryPredicate + ?Sized> RetryPredicate for Arc<P> {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        (**self).should_retry(error, attempt)
    }
}

/// The attempt loop shared by every call.
#[derive(Clone)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    predicate: Arc<dyn RetryPredicate>,
    respect_retry_after: bool,
}

impl RetryPolicy {
    pub fn new(
        strategy: RetryStrategy,
        predicate: Arc<dyn RetryPredicate>,
        respect_retry_after: bool,
    ) -> Self {
        Self {
            strategy,
            predicate,
            respect_retry_after,
        }
    }

    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Runs `operation` until it succeeds or no further attempt is allowed.
    ///
    /// `operation` receives the 1-indexed attempt number. On success the
    /// value is returned with the number of attempts made.
    ///
    /// # Errors
    ///
    /// - Client errors (4xx), cancellation and errors the predicate declines
    ///   are returned as they are, after a single attempt.
    /// - Retryable errors that outlast the strategy are wrapped in
    ///   [`Error::MaxRetriesExceeded`].
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &CallContext,
        mut operation: F,
    ) -> Result<(T, usize)>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            ctx.check()?;

            let error = match operation(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => e,
            };

            if error.is_client_error() || error.is_cancellation() {
                return Err(error);
            }

            tracing::warn!(error = %error, attempt, "Request attempt failed");

            if !self.predicate.should_retry(&error, attempt) {
                return Err(error);
            }

            let Some(mut delay) = self.strategy.delay_for_attempt(attempt) else {
                return Err(Error::MaxRetriesExceeded {
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            };

            if self.respect_retry_after {
                if let Some(hint) = error.rate_limit_delay(self.strategy.max_delay()) {
                    delay = delay.max(hint);
                }
            }

            tracing::info!(delay_ms = delay.as_millis(), attempt, "Retrying request after delay");
            ctx.sleep(delay).await?;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryStrategy::default(), Arc::new(RetryOnRetryable), false)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("strategy", &self.strategy)
            .field("respect_retry_after", &self.respect_retry_after)
            .finish_non_exhaustive()
    }
}
