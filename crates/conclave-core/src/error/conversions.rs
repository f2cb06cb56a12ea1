//! Umbrella error and retry classification

use super::{ContextError, DatabaseError, GenerationError, NetworkError, ToolError};
use crate::config::ConfigError;
use crate::identifiers::IdValidationError;
use thiserror::Error;

/// Any failure a Conclave operation can surface
#[derive(Debug, Error)]
pub enum ConclaveError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Invalid identifier: {0}")]
    InvalidId(#[from] IdValidationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The broadcast channel failed or closed
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("{0}")]
    Other(String),
}

/// Result type for umbrella operations
pub type ConclaveResult<T> = Result<T, ConclaveError>;

/// Classifies errors that a caller may retry with backoff.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for NetworkError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Retryable for DatabaseError {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Retryable for ConclaveError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network(err) => err.is_retryable(),
            _ => false,
        }
    }
}
