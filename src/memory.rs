//! In-process protocol handler backed by a shared memory store

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{ClientError, Result};
use crate::protocol::{
    IncomingLogEntry, LogQuery, OutgoingLogEntry, ProtocolHandler, StatRecord, TruncateRequest,
};
use crate::records::{Credentials, current_timestamp};

pub const MEMORY_ADDRESS: &str = "memory";

#[derive(Debug, Default)]
struct StoreState {
    entries: Vec<OutgoingLogEntry>,
    batches: Vec<usize>,
    limit: i64,
    last_ts: i64,
    write_delay: Duration,
    fail_writes: bool,
}

/// Log storage shared by every handler created over it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with a size limit reported by stat.
    pub fn with_limit(limit: i64) -> Self {
        let store = Self::new();
        store.lock().limit = limit;
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sizes of the write batches accepted so far, in arrival order.
    pub fn batches(&self) -> Vec<usize> {
        self.lock().batches.clone()
    }

    /// Every stored entry, oldest first.
    pub fn entries(&self) -> Vec<OutgoingLogEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delay every write acknowledgment.
    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    /// Make writes fail after consuming their entries.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn append(&self, batch: Vec<IncomingLogEntry>) -> Result<()> {
        let mut state = self.lock();

        if state.fail_writes {
            return Err(ClientError::transport("write", "rejected by memory log"));
        }

        state.batches.push(batch.len());

        for entry in batch {
            // Strictly increasing so entries written in one batch keep their order.
            let ts = current_timestamp().max(state.last_ts + 1);
            state.last_ts = ts;
            state.entries.push(OutgoingLogEntry {
                ts,
                sev: entry.sev,
                src: entry.src,
                msg: entry.msg,
            });
        }

        Ok(())
    }

    fn select(&self, queries: &[LogQuery]) -> Vec<OutgoingLogEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| queries.iter().any(|q| q.matches(e.ts, e.sev, &e.src)))
            .cloned()
            .collect()
    }

    fn truncate(&self, request: &TruncateRequest) {
        let mut state = self.lock();
        state
            .entries
            .retain(|e| e.ts >= request.lim || !(request.src.is_empty() || request.src == e.src));
    }

    fn stat(&self) -> StatRecord {
        let state = self.lock();
        StatRecord {
            addr: MEMORY_ADDRESS.to_string(),
            sz: state.entries.iter().map(|e| e.msg.len() as i64).sum(),
            lim: state.limit,
        }
    }
}

/// [`ProtocolHandler`] that serves requests from a [`MemoryStore`].
#[derive(Debug, Default)]
pub struct MemoryProtocolHandler {
    store: MemoryStore,
    closed: AtomicBool,
}

impl MemoryProtocolHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            closed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProtocolHandler for MemoryProtocolHandler {
    async fn write(
        &self,
        _credentials: &Credentials,
        mut entries: mpsc::Receiver<IncomingLogEntry>,
    ) -> Result<()> {
        self.ensure_open()?;

        let mut batch = Vec::new();
        while let Some(entry) = entries.recv().await {
            batch.push(entry);
        }

        if batch.is_empty() {
            return Ok(());
        }

        let delay = self.store.lock().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        debug!("Memory log accepted batch of {} entries", batch.len());
        self.store.append(batch)
    }

    async fn read(
        &self,
        _credentials: &Credentials,
        mut queries: mpsc::Receiver<LogQuery>,
        results: mpsc::Sender<OutgoingLogEntry>,
    ) -> Result<()> {
        self.ensure_open()?;

        let mut collected = Vec::new();
        while let Some(query) = queries.recv().await {
            collected.push(query);
        }

        for entry in self.store.select(&collected) {
            if results.send(entry).await.is_err() {
                break;
            }
        }

        Ok(())
    }

    async fn truncate(&self, _credentials: &Credentials, request: TruncateRequest) -> Result<()> {
        self.ensure_open()?;
        self.store.truncate(&request);
        Ok(())
    }

    async fn stat(&self, _credentials: &Credentials, results: mpsc::Sender<StatRecord>) -> Result<()> {
        self.ensure_open()?;
        let _ = results.send(self.store.stat()).await;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
