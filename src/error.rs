// src/error.rs - Error taxonomy for the screening engine

use thiserror::Error;

/// Failures the engine surfaces to its callers.
///
/// A message that matches nothing, or a blocked user sending a message,
/// is not an error and never produces one of these.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The flag registry cannot accept another record
    #[error("flag registry is full ({capacity} records); violation could not be recorded")]
    RegistryFull { capacity: usize },

    #[error("invalid pattern '{pattern}' in category '{category}': {reason}")]
    InvalidPattern {
        category: String,
        pattern: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    /// Whether the caller should treat this as a temporary service outage
    pub fn is_unavailable(&self) -> bool {
        matches!(self, MonitorError::RegistryFull { .. })
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
