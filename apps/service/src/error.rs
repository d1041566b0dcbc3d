use thiserror::Error;

/// Errors surfaced by the monitoring core to its callers
#[derive(Debug, Error)]
pub enum UptimeError {
    /// A persisted monitor cannot be scheduled as configured
    #[error("invalid configuration for monitor {monitor_id}: {reason}")]
    Config { monitor_id: String, reason: String },

    /// The store rejected a read or write
    #[error("store operation failed: {0:#}")]
    Persistence(#[from] anyhow::Error),

    /// No live worker exists for the requested monitor
    #[error("monitor {0} is not being monitored")]
    NotFound(String),

    /// A settings key/value pair failed validation
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl UptimeError {
    pub fn config(monitor_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config { monitor_id: monitor_id.into(), reason: reason.into() }
    }

    /// Monitor the error relates to, if any
    pub fn monitor_id(&self) -> Option<&str> {
        match self {
            Self::Config { monitor_id, .. } => Some(monitor_id),
            Self::NotFound(monitor_id) => Some(monitor_id),
            _ => None,
        }
    }
}

/// Failure of a single probe. Always classified as `down`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected status code: {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),
}
