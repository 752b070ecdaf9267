//! Turns buffer snapshots into transport write requests

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};
use uuid::Uuid;

use crate::errors::{ClientError, Result};
use crate::protocol::{IncomingLogEntry, ProtocolHandler};
use crate::records::{Credentials, PendingEntry};

/// Capacity of the flush failure broadcast channel.
pub const FLUSH_FAILURE_CAPACITY: usize = 64;

/// An asynchronous flush the transport did not accept.
#[derive(Debug, Clone)]
pub struct FlushFailure {
    pub batch_id: Uuid,
    pub entries: usize,
    pub error: String,
}

/// Entry count of a background flush and what the transport said.
type FlushOutcome = (usize, Result<()>);

pub(crate) struct FlushDispatcher {
    handler: Arc<dyn ProtocolHandler>,
    credentials: Arc<Credentials>,
    failures: broadcast::Sender<FlushFailure>,
    runtime: Handle,
    in_flight: JoinSet<FlushOutcome>,
    failed_batches: usize,
    failed_entries: usize,
    first_failure: Option<ClientError>,
}

impl FlushDispatcher {
    pub(crate) fn new(
        handler: Arc<dyn ProtocolHandler>,
        credentials: Arc<Credentials>,
        failures: broadcast::Sender<FlushFailure>,
        runtime: Handle,
    ) -> Self {
        Self {
            handler,
            credentials,
            failures,
            runtime,
            in_flight: JoinSet::new(),
            failed_batches: 0,
            failed_entries: 0,
            first_failure: None,
        }
    }

    /// Hand a batch to the transport without waiting for it.
    ///
    /// The conduit holds the whole batch so filling it never blocks the
    /// caller. Failures are reported on the failure channel, and the write
    /// stays tracked until [`FlushDispatcher::settle`] collects it.
    pub(crate) fn dispatch(&mut self, batch: Vec<PendingEntry>) {
        while let Some(joined) = self.in_flight.try_join_next() {
            self.collect(joined);
        }

        if batch.is_empty() {
            return;
        }

        let batch_id = Uuid::new_v4();
        let entries = batch.len();
        let (tx, rx) = mpsc::channel::<IncomingLogEntry>(entries);

        let handler = Arc::clone(&self.handler);
        let credentials = Arc::clone(&self.credentials);
        let failures = self.failures.clone();

        let write = async move {
            let result = handler.write(&credentials, rx).await;
            match &result {
                Ok(()) => debug!("Batch {} with {} entries accepted", batch_id, entries),
                Err(e) => {
                    error!("Failed to write batch {} with {} entries: {}", batch_id, entries, e);
                    // No subscribers is fine; the failure is already logged.
                    let _ = failures.send(FlushFailure {
                        batch_id,
                        entries,
                        error: e.to_string(),
                    });
                }
            }
            (entries, result)
        };
        self.in_flight.spawn_on(write, &self.runtime);

        for entry in batch {
            if tx.try_send(entry.into()).is_err() {
                // The handler stopped consuming; its task reports why.
                break;
            }
        }
    }

    /// Number of background writes not yet collected.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn collect(&mut self, joined: std::result::Result<FlushOutcome, JoinError>) {
        let (entries, result) = joined.unwrap_or_else(|e| {
            (
                0,
                Err(ClientError::TaskFailed {
                    task: "write",
                    reason: e.to_string(),
                }),
            )
        });

        if let Err(e) = result {
            self.failed_batches += 1;
            self.failed_entries += entries;
            self.first_failure.get_or_insert(e);
        }
    }

    /// Wait for every background write to finish.
    ///
    /// Fails with [`ClientError::FlushIncomplete`] if any background write
    /// since the last settle was not accepted, carrying the first failure.
    pub(crate) async fn settle(&mut self) -> Result<()> {
        while let Some(joined) = self.in_flight.join_next().await {
            self.collect(joined);
        }

        match self.first_failure.take() {
            None => Ok(()),
            Some(source) => Err(ClientError::FlushIncomplete {
                batches: std::mem::take(&mut self.failed_batches),
                entries: std::mem::take(&mut self.failed_entries),
                source: Box::new(source),
            }),
        }
    }

    /// Hand a batch to the transport and wait until it is accepted.
    pub(crate) async fn dispatch_sync(&self, batch: Vec<PendingEntry>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let batch_id = Uuid::new_v4();
        let entries = batch.len();
        let (tx, rx) = mpsc::channel::<IncomingLogEntry>(1);

        let handler = Arc::clone(&self.handler);
        let credentials = Arc::clone(&self.credentials);
        let write = self
            .runtime
            .spawn(async move { handler.write(&credentials, rx).await });

        for entry in batch {
            if tx.send(entry.into()).await.is_err() {
                break;
            }
        }
        drop(tx);

        write.await.map_err(|e| ClientError::TaskFailed {
            task: "write",
            reason: format!("batch {}: {}", batch_id, e),
        })??;

        debug!("Final batch {} with {} entries accepted", batch_id, entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProtocolHandler;
    use crate::records::Severity;
    use std::time::Duration;

    fn entries(n: usize) -> Vec<PendingEntry> {
        (0..n)
            .map(|i| PendingEntry::new(Severity::from(1), "Test", format!("message {}", i)))
            .collect()
    }

    fn dispatcher(handler: Arc<MemoryProtocolHandler>) -> (FlushDispatcher, broadcast::Receiver<FlushFailure>) {
        let (failures, failures_rx) = broadcast::channel(FLUSH_FAILURE_CAPACITY);
        let dispatcher = FlushDispatcher::new(
            handler,
            Arc::new(Credentials::anonymous()),
            failures,
            Handle::current(),
        );
        (dispatcher, failures_rx)
    }

    #[tokio::test]
    async fn test_sync_dispatch_waits_for_acceptance() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        let store = handler.store();
        store.set_write_delay(Duration::from_millis(50));
        let (dispatcher, _) = dispatcher(handler);

        dispatcher.dispatch_sync(entries(3)).await.unwrap();

        assert_eq!(store.batches(), vec![3]);
        let messages: Vec<String> = store.entries().into_iter().map(|e| e.msg).collect();
        assert_eq!(messages, vec!["message 0", "message 1", "message 2"]);
    }

    #[tokio::test]
    async fn test_sync_dispatch_of_empty_batch_is_noop() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        let store = handler.store();
        let (dispatcher, _) = dispatcher(handler);

        dispatcher.dispatch_sync(Vec::new()).await.unwrap();
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn test_sync_dispatch_surfaces_rejection() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        handler.store().set_fail_writes(true);
        let (dispatcher, _) = dispatcher(handler);

        let result = dispatcher.dispatch_sync(entries(2)).await;
        assert!(matches!(result, Err(ClientError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_async_dispatch_reports_failures() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        handler.store().set_fail_writes(true);
        let (mut dispatcher, mut failures) = dispatcher(handler);

        dispatcher.dispatch(entries(5));

        let failure = tokio::time::timeout(Duration::from_secs(2), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failure.entries, 5);
        assert!(failure.error.contains("rejected"));
    }

    #[tokio::test]
    async fn test_async_dispatches_run_concurrently() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        let store = handler.store();
        store.set_write_delay(Duration::from_millis(100));
        let (mut dispatcher, _) = dispatcher(handler);

        let started = tokio::time::Instant::now();
        dispatcher.dispatch(entries(2));
        dispatcher.dispatch(entries(3));
        assert!(started.elapsed() < Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut batches = store.batches();
        batches.sort();
        assert_eq!(batches, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_settle_waits_for_background_writes() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        let store = handler.store();
        store.set_write_delay(Duration::from_millis(200));
        let (mut dispatcher, _) = dispatcher(handler);

        dispatcher.dispatch(entries(4));
        dispatcher.dispatch(entries(6));
        assert_eq!(dispatcher.in_flight(), 2);
        assert!(store.is_empty());

        dispatcher.settle().await.unwrap();

        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(store.len(), 10);
    }

    #[tokio::test]
    async fn test_settle_reports_rejected_background_writes() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        handler.store().set_fail_writes(true);
        let (mut dispatcher, _) = dispatcher(handler);

        dispatcher.dispatch(entries(3));
        dispatcher.dispatch(entries(7));

        match dispatcher.settle().await {
            Err(ClientError::FlushIncomplete {
                batches,
                entries,
                source,
            }) => {
                assert_eq!(batches, 2);
                assert_eq!(entries, 10);
                assert!(matches!(*source, ClientError::Transport { operation: "write", .. }));
            }
            other => panic!("unexpected settle result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_settle_keeps_failures_of_reaped_writes() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        let store = handler.store();
        store.set_fail_writes(true);
        let (mut dispatcher, _) = dispatcher(handler);

        dispatcher.dispatch(entries(2));
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_fail_writes(false);
        dispatcher.dispatch(entries(3));
        assert_eq!(dispatcher.in_flight(), 1);

        let result = dispatcher.settle().await;
        assert!(matches!(
            result,
            Err(ClientError::FlushIncomplete { batches: 1, entries: 2, .. })
        ));
        assert_eq!(store.len(), 3);

        // Reported once.
        dispatcher.settle().await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_writes_are_reaped_on_dispatch() {
        let handler = Arc::new(MemoryProtocolHandler::new());
        let (mut dispatcher, _) = dispatcher(handler);

        dispatcher.dispatch(entries(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatcher.dispatch(entries(1));

        assert_eq!(dispatcher.in_flight(), 1);
        dispatcher.settle().await.unwrap();
    }
}
