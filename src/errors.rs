//! Error types for the LogHub client

use std::fmt;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug)]
pub enum ClientError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Severity outside of [0, 255]
    InvalidSeverity(i64),

    /// The client (or its transport) has been closed
    Closed,

    /// The log rejected or failed a write, read, truncate or stat request
    Transport {
        operation: &'static str,
        message: String,
    },

    /// Background flushes still in flight at close did not all land.
    /// `source` is the first failure observed.
    FlushIncomplete {
        batches: usize,
        entries: usize,
        source: Box<ClientError>,
    },

    /// A background task panicked or was aborted before reporting
    TaskFailed { task: &'static str, reason: String },
}

impl ClientError {
    pub(crate) fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        ClientError::Transport {
            operation,
            message: message.into(),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "IO error: {}", err),
            ClientError::Http(err) => write!(f, "HTTP error: {}", err),
            ClientError::Json(err) => write!(f, "JSON error: {}", err),
            ClientError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ClientError::InvalidSeverity(sev) => {
                write!(f, "Invalid severity {}: must be within [0, 255]", sev)
            }
            ClientError::Closed => write!(f, "Client is closed"),
            ClientError::Transport { operation, message } => {
                write!(f, "Log {} failed: {}", operation, message)
            }
            ClientError::FlushIncomplete {
                batches,
                entries,
                source,
            } => write!(
                f,
                "{} batches ({} entries) were not accepted before close: {}",
                batches, entries, source
            ),
            ClientError::TaskFailed { task, reason } => {
                write!(f, "{} task failed: {}", task, reason)
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Io(err) => Some(err),
            ClientError::Http(err) => Some(err),
            ClientError::Json(err) => Some(err),
            ClientError::FlushIncomplete { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Json(err)
    }
}
