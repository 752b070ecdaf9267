//! LogHub client facade

use chrono::{DateTime, TimeZone};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, instrument};

use crate::batcher::{Batcher, BatcherHandle};
use crate::config::ClientOptions;
use crate::dispatcher::{FLUSH_FAILURE_CAPACITY, FlushDispatcher, FlushFailure};
use crate::errors::{ClientError, Result};
use crate::memory::MemoryProtocolHandler;
use crate::protocol::{LogQuery, ProtocolHandler, TruncateRequest};
use crate::records::{Credentials, LogEntry, LogInfo, PendingEntry, Severity, time_to_timestamp};
use crate::stream::{ResultStream, bridge};
use crate::transport::HttpProtocolHandler;

/// Client writing to, reading from and managing LogHub logs.
///
/// Writes are buffered and sent in batches by a background task; call
/// [`Client::close`] to flush what is left before dropping the client.
/// Must be created inside a tokio runtime.
pub struct Client {
    handler: Arc<dyn ProtocolHandler>,
    credentials: Arc<Credentials>,
    batcher: BatcherHandle,
    flush_failures: broadcast::Sender<FlushFailure>,
    runtime: Handle,
}

impl Client {
    /// Create a client for the log or hub at `address`.
    ///
    /// The address may be given as `ip:port`, `hostname:port` or `:port`
    /// for a local connection.
    pub fn new(address: &str, options: ClientOptions) -> Result<Self> {
        let handler = HttpProtocolHandler::new(address, &options)?;
        Self::with_handler(Arc::new(handler), options)
    }

    /// Create a client over an in-process memory log
    pub fn in_memory(handler: Arc<MemoryProtocolHandler>, options: ClientOptions) -> Result<Self> {
        Self::with_handler(handler, options)
    }

    /// Create a client over any protocol handler
    pub fn with_handler(handler: Arc<dyn ProtocolHandler>, options: ClientOptions) -> Result<Self> {
        options.validate().map_err(ClientError::Config)?;

        let runtime = Handle::try_current().map_err(|_| {
            ClientError::Config("client must be created within a tokio runtime".to_string())
        })?;

        let credentials = Arc::new(Credentials::resolve(&options.user, &options.password));
        let (flush_failures, _) = broadcast::channel(FLUSH_FAILURE_CAPACITY);

        let dispatcher = FlushDispatcher::new(
            Arc::clone(&handler),
            Arc::clone(&credentials),
            flush_failures.clone(),
            runtime.clone(),
        );
        let (batcher, batcher_handle) =
            Batcher::new(options.flush_len, options.flush_interval, dispatcher);
        runtime.spawn(batcher.run());

        info!(
            "LogHub client started for user {} (flush every {} entries or {:?})",
            credentials.user, options.flush_len, options.flush_interval
        );

        Ok(Self {
            handler,
            credentials,
            batcher: batcher_handle,
            flush_failures,
            runtime,
        })
    }

    /// Credentials attached to every request
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Subscribe to failures of batches flushed in the background
    pub fn flush_failures(&self) -> broadcast::Receiver<FlushFailure> {
        self.flush_failures.subscribe()
    }

    /// Write a log entry.
    ///
    /// Severity must be within [0, 255]. Waits only for the entry to be
    /// handed to the batcher, not for it to reach the log.
    pub async fn write(
        &self,
        severity: i64,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        let severity = Severity::try_from(severity)?;

        self.batcher
            .intake
            .send(PendingEntry::new(severity, source, message))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Read entries matching the criteria.
    ///
    /// With no sources the entries are returned regardless of their
    /// source; otherwise one query per source is issued. No ordering is
    /// guaranteed across sources.
    pub fn read<Tz, S>(
        &self,
        from: &DateTime<Tz>,
        to: &DateTime<Tz>,
        min_sev: u8,
        max_sev: u8,
        sources: &[S],
    ) -> ResultStream<LogEntry>
    where
        Tz: TimeZone,
        S: AsRef<str>,
    {
        let queries = build_queries(
            time_to_timestamp(from),
            time_to_timestamp(to),
            min_sev,
            max_sev,
            sources,
        );
        debug!("Reading with {} queries", queries.len());

        let (query_tx, query_rx) = mpsc::channel(queries.len());
        for query in queries {
            // Sized to the query count, cannot be full.
            let _ = query_tx.try_send(query);
        }
        drop(query_tx);

        let handler = Arc::clone(&self.handler);
        let credentials = Arc::clone(&self.credentials);

        bridge(&self.runtime, move |results| async move {
            handler.read(&credentials, query_rx, results).await
        })
    }

    /// Truncate the log before `limit`; an empty source truncates all sources
    #[instrument(skip(self, limit))]
    pub async fn truncate<Tz: TimeZone>(&self, limit: &DateTime<Tz>, source: &str) -> Result<()> {
        let request = TruncateRequest {
            src: source.to_string(),
            lim: time_to_timestamp(limit),
        };

        self.handler.truncate(&self.credentials, request).await
    }

    /// Get information about the logs
    pub fn stat(&self) -> ResultStream<LogInfo> {
        let handler = Arc::clone(&self.handler);
        let credentials = Arc::clone(&self.credentials);

        bridge(&self.runtime, move |results| async move {
            handler.stat(&credentials, results).await
        })
    }

    /// Close the client, flushing every written entry.
    ///
    /// Waits for background flushes still in flight, then flushes the rest.
    /// Returns once every batch has settled: `Ok` if the log accepted all of
    /// them, the rejection of the final batch, or
    /// [`ClientError::FlushIncomplete`] if a background flush was lost. The
    /// transport is released in every case. Closing an already closed
    /// client, or racing another close, fails with [`ClientError::Closed`]
    /// and leaves the transport to the first closer.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();

        self.batcher
            .shutdown
            .send(ack_tx)
            .await
            .map_err(|_| ClientError::Closed)?;

        // The batcher only drops the ack when another close got there first.
        let result = ack_rx.await.map_err(|_| ClientError::Closed)?;

        self.handler.close().await;
        info!("LogHub client closed");

        result
    }
}

/// One query per source, or a single unrestricted query without sources.
pub fn build_queries<S: AsRef<str>>(
    from: i64,
    to: i64,
    min_sev: u8,
    max_sev: u8,
    sources: &[S],
) -> Vec<LogQuery> {
    let query = |src: &str| LogQuery {
        from,
        to,
        min_sev,
        max_sev,
        src: src.to_string(),
    };

    if sources.is_empty() {
        vec![query("")]
    } else {
        sources.iter().map(|src| query(src.as_ref())).collect()
    }
}
