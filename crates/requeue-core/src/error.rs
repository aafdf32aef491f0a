//! Error types for requeue operations.

use requeue_runtime::{ConfigurationError, QueueError, SerializationError, ValidationError};
use thiserror::Error;

/// Standard result type for requeue operations
pub type RequeueResult<T> = Result<T, RequeueError>;

/// Errors that escape a requeue operation
///
/// Lookup timeouts, missing `FailedQ` headers and unmatched scans are outcomes,
/// not errors; they never show up here.
#[derive(Debug, Error)]
pub enum RequeueError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Queue access failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Header payload error: {0}")]
    Header(#[from] SerializationError),

    #[error("Invalid queue address: {0}")]
    Address(#[from] ValidationError),
}

impl RequeueError {
    /// Check whether the error stems from settings rather than from queue access
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Address(_))
    }
}

impl From<ConfigurationError> for RequeueError {
    fn from(error: ConfigurationError) -> Self {
        Self::Configuration {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
