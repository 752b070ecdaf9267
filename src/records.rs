//! Client-facing log records and conversions

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ClientError;

/// Identity used when no user is configured.
pub const ANONYMOUS: &str = "anonymous";

/// Severity of a log entry, always within [0, 255].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Severity(u8);

impl Severity {
    pub const MIN: Severity = Severity(u8::MIN);
    pub const MAX: Severity = Severity(u8::MAX);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl From<u8> for Severity {
    fn from(value: u8) -> Self {
        Severity(value)
    }
}

impl TryFrom<i64> for Severity {
    type Error = ClientError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map(Severity)
            .map_err(|_| ClientError::InvalidSeverity(value))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A log entry as returned by reads.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub severity: u8,
    pub source: String,
    pub message: String,
}

/// Size information of one log or hub endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogInfo {
    /// Address of the log in the form `ip:port`
    pub address: String,

    /// Current size of the log in bytes
    pub size: i64,

    /// Limit set on the log size in bytes
    pub limit: i64,
}

/// An entry admitted by the client and waiting in the write buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    pub severity: Severity,
    pub source: String,
    pub message: String,
}

impl PendingEntry {
    pub fn new(severity: Severity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Credentials attached to every request of a client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Resolve credentials; an empty user yields the anonymous identity.
    pub fn resolve(user: &str, password: &str) -> Self {
        if user.is_empty() {
            Self::anonymous()
        } else {
            Self {
                user: user.to_string(),
                password: password.to_string(),
            }
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user: ANONYMOUS.to_string(),
            password: String::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user == ANONYMOUS
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Convert a point in time into epoch nanoseconds, saturating outside the
/// representable range.
pub fn time_to_timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(if time.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Convert epoch nanoseconds into local time.
pub fn timestamp_to_local_time(timestamp: i64) -> DateTime<Local> {
    Local.timestamp_nanos(timestamp)
}

/// Current time in epoch nanoseconds.
pub fn current_timestamp() -> i64 {
    time_to_timestamp(&Local::now())
}
