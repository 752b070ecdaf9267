//! LogHub Client Library
//!
//! This library provides a client for writing, reading and managing LogHub
//! logs. Written entries are buffered by a background task and sent to the
//! log in batches; reads and stats are returned as streams.

pub mod config;
pub mod client;
pub mod protocol;
pub mod records;
pub mod transport;
pub mod memory;
pub mod stream;
pub mod errors;

mod batcher;
mod dispatcher;

pub use config::ClientOptions;
pub use client::Client;
pub use dispatcher::FlushFailure;
pub use memory::{MemoryProtocolHandler, MemoryStore};
pub use protocol::ProtocolHandler;
pub use records::{Credentials, LogEntry, LogInfo, PendingEntry, Severity};
pub use stream::ResultStream;
pub use transport::HttpProtocolHandler;
pub use errors::{ClientError, Result};
