//! Write buffering owned by a single task
//!
//! The batcher task is the only code that touches the pending buffer.
//! Producers reach it through the intake channel, the closer through the
//! shutdown channel. Those channels are the lifecycle: the batcher is open
//! while the intake accepts sends, draining once `close` has shut the
//! intake, and gone once `run` returns.

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::dispatcher::FlushDispatcher;
use crate::errors::{ClientError, Result};
use crate::records::PendingEntry;

/// Acknowledgment sent back to the closer once the final flush is done.
pub(crate) type CloseAck = oneshot::Sender<Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushTrigger {
    Size,
    Time,
}

/// Sending halves used by the client.
pub(crate) struct BatcherHandle {
    pub(crate) intake: mpsc::Sender<PendingEntry>,
    pub(crate) shutdown: mpsc::Sender<CloseAck>,
}

pub(crate) struct Batcher {
    buffer: Vec<PendingEntry>,
    flushed_at: Instant,
    flush_len: usize,
    flush_interval: Duration,
    intake: mpsc::Receiver<PendingEntry>,
    shutdown: mpsc::Receiver<CloseAck>,
    dispatcher: FlushDispatcher,
}

impl Batcher {
    pub(crate) fn new(
        flush_len: usize,
        flush_interval: Duration,
        dispatcher: FlushDispatcher,
    ) -> (Self, BatcherHandle) {
        let (intake_tx, intake_rx) = mpsc::channel(flush_len);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let batcher = Self {
            buffer: Vec::with_capacity(flush_len),
            flushed_at: Instant::now(),
            flush_len,
            flush_interval,
            intake: intake_rx,
            shutdown: shutdown_rx,
            dispatcher,
        };

        let handle = BatcherHandle {
            intake: intake_tx,
            shutdown: shutdown_tx,
        };

        (batcher, handle)
    }

    #[instrument(skip(self))]
    pub(crate) async fn run(mut self) {
        debug!("Batcher started");

        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.flushed_at.elapsed() >= self.flush_interval && !self.buffer.is_empty() {
                        self.flush(FlushTrigger::Time);
                    }
                }

                entry = self.intake.recv() => match entry {
                    Some(entry) => self.admit(entry),
                    None => {
                        warn!("Client dropped without close, flushing {} pending entries", self.buffer.len());
                        if let Err(e) = self.finish().await {
                            warn!("Final flush after drop failed: {}", e);
                        }
                        break;
                    }
                },

                ack = self.shutdown.recv() => {
                    let result = self.close().await;
                    match ack {
                        Some(ack) => {
                            if ack.send(result).is_err() {
                                warn!("Close acknowledgment dropped by the closer");
                            }
                        }
                        None => {
                            if let Err(e) = result {
                                warn!("Final flush after drop failed: {}", e);
                            }
                        }
                    }
                    break;
                }
            }
        }

        debug!("Batcher stopped");
    }

    fn admit(&mut self, entry: PendingEntry) {
        self.buffer.push(entry);

        if self.buffer.len() >= self.flush_len {
            self.flush(FlushTrigger::Size);
        }
    }

    /// Swap the buffer for an empty one and hand the snapshot off.
    fn take_snapshot(&mut self) -> Vec<PendingEntry> {
        self.flushed_at = Instant::now();
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.flush_len))
    }

    fn flush(&mut self, trigger: FlushTrigger) {
        let snapshot = self.take_snapshot();
        debug!("{:?} flush of {} entries", trigger, snapshot.len());
        self.dispatcher.dispatch(snapshot);
    }

    async fn flush_sync(&mut self) -> Result<()> {
        let snapshot = self.take_snapshot();
        self.dispatcher.dispatch_sync(snapshot).await
    }

    /// Wait for background flushes, then flush what is left.
    ///
    /// A failed final flush counts toward an incomplete background flush
    /// if there was one; otherwise it is returned as is.
    async fn finish(&mut self) -> Result<()> {
        let pending = self.buffer.len();
        let settled = self.dispatcher.settle().await;
        let flushed = self.flush_sync().await;

        match (settled, flushed) {
            (Ok(()), flushed) => flushed,
            (
                Err(ClientError::FlushIncomplete {
                    batches,
                    entries,
                    source,
                }),
                Err(_),
            ) => Err(ClientError::FlushIncomplete {
                batches: batches + 1,
                entries: entries + pending,
                source,
            }),
            (Err(e), _) => Err(e),
        }
    }

    /// Stop intake, drain what producers already handed off, flush.
    async fn close(&mut self) -> Result<()> {
        // Producers that have not completed their hand-off get `Closed`;
        // everything already queued is still delivered below.
        self.intake.close();

        let mut drained = 0;
        while let Some(entry) = self.intake.recv().await {
            self.buffer.push(entry);
            drained += 1;
        }

        info!(
            "Closing batcher: drained {} entries, {} flushes in flight, flushing {} pending",
            drained,
            self.dispatcher.in_flight(),
            self.buffer.len()
        );

        self.finish().await
    }
}
