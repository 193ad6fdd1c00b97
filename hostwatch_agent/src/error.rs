//! Error taxonomy for the agent.
//!
//! None of these are fatal once the loop is running: acquisition errors are
//! recovered inside the snapshot builder, transport errors inside the
//! transmitter, alert errors per channel. Only `ConfigError` stops the process.

use thiserror::Error;

/// Startup configuration problems. Fatal before the loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// A single metric family (or filesystem) could not be read.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("{what} unavailable: {reason}")]
    Unavailable { what: String, reason: String },

    #[error("mountpoint {0} not found")]
    UnknownMountpoint(String),

    #[error("i/o error reading {path}: {source}")]
    Io {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics handle lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl AcquisitionError {
    pub fn unavailable(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed delivery attempt to the ingestion endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("endpoint responded with HTTP {0}")]
    Status(u16),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unexpected transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Timeouts, refused connections and non-2xx responses are worth another try.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect(_) | Self::Status(_))
    }
}

/// Delivery failure on a single alert channel.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("channel `{0}` is not configured")]
    NotConfigured(&'static str),

    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook rejected alert with HTTP {0}")]
    Rejected(u16),
}
