//! Bridges transport result channels to caller-facing streams

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::errors::{ClientError, Result};

/// Capacity of the transport and caller-facing result channels.
pub const STREAM_CAPACITY: usize = 64;

/// Finite stream of results of a read or stat request.
///
/// Ends once the transport has delivered everything. A transport failure
/// is delivered as a final `Err` item. Dropping the stream, or calling
/// [`ResultStream::cancel`], aborts the request.
#[derive(Debug)]
pub struct ResultStream<T> {
    rx: mpsc::Receiver<Result<T>>,
    tasks: Vec<AbortHandle>,
}

impl<T> ResultStream<T> {
    /// Receive the next item, `None` once the stream is exhausted.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    /// Abort the underlying request.
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.rx.close();
    }
}

impl<T> Unpin for ResultStream<T> {}

impl<T> Stream for ResultStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for ResultStream<T> {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Run `request` against a fresh transport channel and forward every
/// record, converted, onto the returned stream.
///
/// Two tasks per call: the transport request and the forwarder. The
/// forwarder closes the stream once the transport channel is exhausted,
/// after reporting the request's own outcome.
pub(crate) fn bridge<W, T, F, Fut>(runtime: &Handle, request: F) -> ResultStream<T>
where
    W: Send + 'static,
    T: From<W> + Send + 'static,
    F: FnOnce(mpsc::Sender<W>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (transport_tx, mut transport_rx) = mpsc::channel::<W>(STREAM_CAPACITY);
    let (result_tx, result_rx) = mpsc::channel::<Result<T>>(STREAM_CAPACITY);

    let transport = runtime.spawn(request(transport_tx));
    let transport_abort = transport.abort_handle();

    let forwarder = runtime.spawn(async move {
        let mut forwarded = 0usize;

        while let Some(record) = transport_rx.recv().await {
            if result_tx.send(Ok(T::from(record))).await.is_err() {
                debug!("Result stream dropped after {} records", forwarded);
                return;
            }
            forwarded += 1;
        }

        let outcome = match transport.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) if e.is_cancelled() => None,
            Err(e) => Some(ClientError::TaskFailed {
                task: "request",
                reason: e.to_string(),
            }),
        };

        if let Some(e) = outcome {
            warn!("Request failed after {} records: {}", forwarded, e);
            let _ = result_tx.send(Err(e)).await;
        } else {
            debug!("Request exhausted after {} records", forwarded);
        }
    });

    ResultStream {
        rx: result_rx,
        tasks: vec![transport_abort, forwarder.abort_handle()],
    }
}
