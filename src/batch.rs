//! Batch (concurrent fan-out) and pipeline (sequential stream) execution.
//!
//! Items bypass retries, the circuit breaker, the cache and load balancing:
//! each one is serialized, sent once against the client's base URL and
//! checked for an error status.

use crate::{
    client::Client,
    context::CallContext,
    dispatch::{encode_body, EncodedBody},
    Error, Result,
};
use bytes::Bytes;
use futures::{future, stream, Stream, StreamExt};
use http::Method;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Item {
    method: Method,
    url: String,
    body: Option<EncodedBody>,
}

/// The outcome of one batch or pipeline item.
#[derive(Debug)]
pub struct BatchResponse {
    /// Position of the item in the order it was added.
    pub index: usize,
    /// The raw response body, or why the item failed.
    pub result: Result<Bytes>,
    pub duration: Duration,
}

impl BatchResponse {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

async fn run_item(client: &Client, index: usize, item: &Item, ctx: &CallContext) -> BatchResponse {
    let started = Instant::now();
    let result = client
        .execute_direct(item.method.clone(), &item.url, item.body.as_ref(), ctx)
        .await;
    BatchResponse {
        index,
        result,
        duration: started.elapsed(),
    }
}

/// A set of independent requests sent concurrently.
///
/// Every item gets a result; one failure never cancels its siblings.
///
/// # Examples
///
/// ```no_run
/// use switchyard::Client;
/// use http::Method;
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let results = client
///     .batch()
///     .add(Method::GET, "/users/1")
///     .add(Method::GET, "/users/2")
///     .add_with_body(Method::POST, "/audit", &serde_json::json!({"event": "sync"}))
///     .with_concurrency(2)
///     .execute()
///     .await;
///
/// for item in &results {
///     match &item.result {
///         Ok(body) => println!("#{}: {} bytes", item.index, body.len()),
///         Err(e) => eprintln!("#{} failed: {}", item.index, e),
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BatchRequest {
    client: Client,
    items: Vec<Item>,
    concurrency: Option<usize>,
}

impl BatchRequest {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            items: Vec::new(),
            concurrency: None,
        }
    }

    /// Adds a request without a body.
    pub fn add(mut self, method: Method, url: impl Into<String>) -> Self {
        self.items.push(Item {
            method,
            url: url.into(),
            body: None,
        });
        self
    }

    /// Adds a request with a JSON body.
    ///
    /// A body that fails to serialize fails only this item.
    pub fn add_with_body<B: Serialize + ?Sized>(
        mut self,
        method: Method,
        url: impl Into<String>,
        body: &B,
    ) -> Self {
        self.items.push(Item {
            method,
            url: url.into(),
            body: Some(encode_body(body)),
        });
        self
    }

    /// Caps how many items are in flight at once.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sends every item and waits for all of them.
    ///
    /// `results[i]` always belongs to the `i`-th item added.
    pub async fn execute(self) -> Vec<BatchResponse> {
        self.execute_with_cancellation(CancellationToken::new()).await
    }

    /// Like [`BatchRequest::execute`], but items still running when `token`
    /// fires finish with [`Error::Cancelled`].
    pub async fn execute_with_cancellation(self, token: CancellationToken) -> Vec<BatchResponse> {
        let ctx = CallContext::new(Some(token), None);
        let client = &self.client;
        let ctx = &ctx;
        let jobs = self
            .items
            .iter()
            .enumerate()
            .map(move |(index, item)| run_item(client, index, item, ctx));

        tracing::debug!(
            items = self.items.len(),
            concurrency = self.concurrency,
            "Executing batch"
        );

        match self.concurrency {
            Some(limit) => stream::iter(jobs).buffered(limit).collect().await,
            None => future::join_all(jobs).await,
        }
    }
}

/// A sequence of requests sent one after another.
///
/// # Examples
///
/// ```no_run
/// use switchyard::Client;
/// use http::Method;
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let mut results = client
///     .pipeline()
///     .add(Method::POST, "/jobs/1/start")
///     .add(Method::GET, "/jobs/1/status")
///     .execute();
///
/// while let Some(item) = results.next().await {
///     println!("step {} ok: {}", item.index, item.is_ok());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PipelineRequest {
    client: Client,
    items: Vec<Item>,
}

impl PipelineRequest {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            items: Vec::new(),
        }
    }

    /// Adds a request without a body.
    pub fn add(mut self, method: Method, url: impl Into<String>) -> Self {
        self.items.push(Item {
            method,
            url: url.into(),
            body: None,
        });
        self
    }

    /// Adds a request with a JSON body.
    pub fn add_with_body<B: Serialize + ?Sized>(
        mut self,
        method: Method,
        url: impl Into<String>,
        body: &B,
    ) -> Self {
        self.items.push(Item {
            method,
            url: url.into(),
            body: Some(encode_body(body)),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Starts sending items in the background and streams their results in
    /// order.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn execute(self) -> PipelineStream {
        self.execute_with_cancellation(CancellationToken::new())
    }

    /// Like [`PipelineRequest::execute`]; once `token` fires no further item
    /// is started and the stream ends.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn execute_with_cancellation(self, token: CancellationToken) -> PipelineStream {
        // The stream cancels its own token on drop; the caller's stays live.
        let token = token.child_token();
        let (tx, rx) = mpsc::channel(1);
        let ctx = CallContext::new(Some(token.clone()), None);
        let Self { client, items } = self;

        let handle = tokio::spawn(async move {
            for (index, item) in items.iter().enumerate() {
                if ctx.is_done() {
                    break;
                }
                let response = run_item(&client, index, item, &ctx).await;
                if ctx.is_done() {
                    break;
                }
                let sent = ctx
                    .run(async { tx.send(response).await.map_err(|_| Error::Cancelled) })
                    .await;
                if sent.is_err() {
                    break;
                }
            }
            tracing::debug!(items = items.len(), "Pipeline finished");
        });

        PipelineStream {
            rx,
            token,
            handle,
        }
    }
}

/// Ordered results of a [`PipelineRequest`].
///
/// Dropping the stream stops the background task.
#[derive(Debug)]
pub struct PipelineStream {
    rx: mpsc::Receiver<BatchResponse>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PipelineStream {
    /// The next result, or `None` once every item ran or the pipeline was
    /// cancelled.
    pub async fn next(&mut self) -> Option<BatchResponse> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }

    /// Stops the pipeline. Results not yet received are discarded.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Stream for PipelineStream {
    type Item = BatchResponse;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for PipelineStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
