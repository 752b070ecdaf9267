//! Configuration management for the LogHub client

use crate::errors::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Buffer length at which a flush is triggered.
pub const DEFAULT_FLUSH_LEN: usize = 100;

/// Period of the flush timer.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// How many connections may be maintained simultaneously (0 means 1)
    pub max_connections: usize,

    /// Whether to use a TLS connection
    pub use_tls: bool,

    /// Whether to trust any certificate the server returns
    pub skip_cert_validation: bool,

    /// User name, anonymous if empty
    pub user: String,

    /// User password
    pub password: String,

    /// Number of buffered entries that triggers a flush
    pub flush_len: usize,

    /// Timer period for flushing a partially filled buffer
    #[serde(with = "duration_ms")]
    pub flush_interval: Duration,

    /// Timeout applied by the HTTP transport to each request
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_connections: 1,
            use_tls: false,
            skip_cert_validation: false,
            user: String::new(),
            password: String::new(),
            flush_len: DEFAULT_FLUSH_LEN,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientOptions {
    /// Load options from `LOGHUB_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load options through an arbitrary variable lookup.
    ///
    /// Values that fail to parse leave the default in place.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = ClientOptions::default();

        if let Some(max_connections) = lookup("LOGHUB_MAX_CONNECTIONS") {
            if let Ok(n) = max_connections.parse() {
                options.max_connections = n;
            }
        }

        if let Some(use_tls) = lookup("LOGHUB_USE_TLS") {
            options.use_tls = use_tls.to_lowercase() == "true";
        }

        if let Some(skip) = lookup("LOGHUB_SKIP_CERT_VALIDATION") {
            options.skip_cert_validation = skip.to_lowercase() == "true";
        }

        if let Some(user) = lookup("LOGHUB_USER") {
            options.user = user;
        }

        if let Some(password) = lookup("LOGHUB_PASSWORD") {
            options.password = password;
        }

        if let Some(flush_len) = lookup("LOGHUB_FLUSH_LEN") {
            if let Ok(len) = flush_len.parse() {
                options.flush_len = len;
            }
        }

        if let Some(interval) = lookup("LOGHUB_FLUSH_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                options.flush_interval = Duration::from_millis(ms);
            }
        }

        if let Some(timeout) = lookup("LOGHUB_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                options.request_timeout = Duration::from_secs(seconds);
            }
        }

        options
    }

    /// Load options from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let options = serde_json::from_str(&raw)?;
        Ok(options)
    }

    /// Validate the options
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.flush_len == 0 {
            return Err("flush_len must be greater than 0".to_string());
        }

        if self.flush_interval.is_zero() {
            return Err("flush_interval must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Connection limit with the `0 => 1` default applied
    pub fn effective_max_connections(&self) -> usize {
        self.max_connections.max(1)
    }
}

/// Turn a LogHub address into a base URL.
///
/// Accepts `ip:port`, `hostname:port`, `:port` (local) or a full URL.
pub fn base_url(address: &str, use_tls: bool) -> Result<String> {
    let address = address.trim();

    if address.is_empty() {
        return Err(ClientError::Config("address cannot be empty".to_string()));
    }

    if address.contains("://") {
        return Ok(address.trim_end_matches('/').to_string());
    }

    let scheme = if use_tls { "https" } else { "http" };

    if address.starts_with(':') {
        Ok(format!("{}://localhost{}", scheme, address))
    } else {
        Ok(format!("{}://{}", scheme, address))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
