//! Lifecycle for periodic background work.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A periodic task owned by a client component.
///
/// The task stops when [`BackgroundTask::shutdown`] is called or when the
/// handle is dropped.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Runs `tick` every `interval` on the current Tokio runtime.
    ///
    /// The first tick happens one interval after spawning. Returns `None`
    /// when called outside a runtime or with a zero interval.
    pub fn spawn_periodic<F, Fut>(
        name: &'static str,
        interval: Duration,
        mut tick: F,
    ) -> Option<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(task = name, "No Tokio runtime, background task not started");
            return None;
        };
        if interval.is_zero() {
            tracing::error!(task = name, "Zero interval, background task not started");
            return None;
        }

        let token = CancellationToken::new();
        let stop = token.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
            tracing::debug!(task = name, "Background task stopped");
        });

        tracing::debug!(
            task = name,
            interval_ms = interval.as_millis(),
            "Background task started"
        );
        Some(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    /// Name given at spawn time.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` once the task has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the task and waits for it to finish.
    ///
    /// A task that died from a panic is logged, not propagated.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(task = self.name, error = %e, "Background task failed");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
