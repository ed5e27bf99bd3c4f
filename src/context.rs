//! Per-call cancellation and deadline.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal and deadline governing one call.
///
/// A single context is threaded through rate limiting, host resolution, every
/// transport attempt, retry backoff and backup failover. Once it fires, no
/// further work is started.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Creates a context from an optional caller token and timeout.
    ///
    /// A zero timeout means no deadline.
    pub fn new(token: Option<CancellationToken>, timeout: Option<Duration>) -> Self {
        Self {
            token: token.unwrap_or_default(),
            deadline: timeout
                .filter(|t| !t.is_zero())
                .map(|t| Instant::now() + t),
        }
    }

    /// The token that cancels this call.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    /// Time left before the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` once the call is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Fails if the call has been cancelled or its deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Runs `fut` until it completes or the call is cancelled.
    ///
    /// Cancellation wins over a future that is ready at the same time.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = deadline => Err(Error::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleeps for `duration` unless the call is cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_means_no_deadline() {
        let ctx = CallContext::new(None, Some(Duration::ZERO));
        assert!(ctx.remaining().is_none());
        ctx.sleep(Duration::from_secs(3600)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_sleep_short() {
        let ctx = CallContext::new(None, Some(Duration::from_millis(100)));
        let start = Instant::now();
        let err = ctx.sleep(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(Some(token.clone()), None);
        token.cancel();
        let err = ctx.run(async { Ok(1) }).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
