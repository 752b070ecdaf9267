//! Transport boundary: the protocol handler capability and its wire records

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::records::{
    Credentials, LogEntry, LogInfo, PendingEntry, timestamp_to_local_time,
};

/// Entry sent to a log by a write request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingLogEntry {
    #[serde(rename = "Sev")]
    pub sev: u8,
    #[serde(rename = "Src")]
    pub src: String,
    #[serde(rename = "Msg")]
    pub msg: String,
}

impl From<PendingEntry> for IncomingLogEntry {
    fn from(entry: PendingEntry) -> Self {
        Self {
            sev: entry.severity.value(),
            src: entry.source,
            msg: entry.message,
        }
    }
}

/// Entry returned by a read request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingLogEntry {
    /// Epoch nanoseconds assigned by the log
    #[serde(rename = "Ts")]
    pub ts: i64,
    #[serde(rename = "Sev")]
    pub sev: u8,
    #[serde(rename = "Src")]
    pub src: String,
    #[serde(rename = "Msg")]
    pub msg: String,
}

impl From<OutgoingLogEntry> for LogEntry {
    fn from(entry: OutgoingLogEntry) -> Self {
        Self {
            timestamp: timestamp_to_local_time(entry.ts),
            severity: entry.sev,
            source: entry.src,
            message: entry.msg,
        }
    }
}

/// Read criteria; an empty `src` matches any source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(rename = "From")]
    pub from: i64,
    #[serde(rename = "To")]
    pub to: i64,
    #[serde(rename = "MinSev")]
    pub min_sev: u8,
    #[serde(rename = "MaxSev")]
    pub max_sev: u8,
    #[serde(rename = "Src")]
    pub src: String,
}

impl LogQuery {
    pub fn matches(&self, ts: i64, sev: u8, src: &str) -> bool {
        ts >= self.from
            && ts <= self.to
            && sev >= self.min_sev
            && sev <= self.max_sev
            && (self.src.is_empty() || self.src == src)
    }
}

/// Removes entries older than `lim`; an empty `src` truncates all sources.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateRequest {
    #[serde(rename = "Src")]
    pub src: String,
    #[serde(rename = "Lim")]
    pub lim: i64,
}

/// Size record of one log endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRecord {
    #[serde(rename = "Addr")]
    pub addr: String,
    #[serde(rename = "Sz")]
    pub sz: i64,
    #[serde(rename = "Lim")]
    pub lim: i64,
}

impl From<StatRecord> for LogInfo {
    fn from(stat: StatRecord) -> Self {
        Self {
            address: stat.addr,
            size: stat.sz,
            limit: stat.lim,
        }
    }
}

/// The remote log service as seen by the client.
///
/// Streams are channels: a handler reads `entries`/`queries` until the
/// sender side closes and writes results until it is done, then returns.
/// Dropping the result sender signals exhaustion.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Write every entry received from `entries`; returns once the log has
    /// accepted the whole batch.
    async fn write(
        &self,
        credentials: &Credentials,
        entries: mpsc::Receiver<IncomingLogEntry>,
    ) -> Result<()>;

    async fn read(
        &self,
        credentials: &Credentials,
        queries: mpsc::Receiver<LogQuery>,
        results: mpsc::Sender<OutgoingLogEntry>,
    ) -> Result<()>;

    async fn truncate(&self, credentials: &Credentials, request: TruncateRequest) -> Result<()>;

    async fn stat(&self, credentials: &Credentials, results: mpsc::Sender<StatRecord>) -> Result<()>;

    /// Release all held connections.
    async fn close(&self);
}
