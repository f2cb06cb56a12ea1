//! Transport failures

use thiserror::Error;

/// A transport-level failure; `retryable` marks transient ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Network error: {message}")]
pub struct NetworkError {
    pub message: String,
    pub retryable: bool,
}

impl NetworkError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}
