//! Error types for a3s-push

use thiserror::Error;

/// Errors that can occur in the notification pipeline
#[derive(Debug, Error)]
pub enum PushError {
    /// Backing object store could not be read or written
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Conditional write lost against a concurrent writer
    #[error("Conflicting write to '{bucket}/{key}'")]
    Conflict {
        bucket: String,
        key: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed client input (bad JSON body, missing fields)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A single push delivery failed
    #[error("Failed to deliver to '{endpoint}': {reason}")]
    Delivery {
        endpoint: String,
        reason: String,
    },

    /// Push endpoint no longer exists (expired or unsubscribed)
    #[error("Push endpoint gone: {0}")]
    Gone(String),

    /// Role assumption or scoped credential failure
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relay connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Relay stream/consumer error
    #[error("Relay error: {0}")]
    Relay(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A scheduled operation was cancelled before it ran
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl PushError {
    /// HTTP-equivalent status for reporting this error at the boundary
    pub fn status_code(&self) -> u16 {
        match self {
            PushError::InvalidInput(_) => 400,
            PushError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

/// Result type alias for push operations
pub type Result<T> = std::result::Result<T, PushError>;
