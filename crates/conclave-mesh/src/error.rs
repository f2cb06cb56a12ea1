//! Error types for channel and election operations

use conclave_core::ConclaveError;
use thiserror::Error;

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors that can occur on the broadcast channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// The channel was closed, for this peer or for the whole bus
    #[error("Channel closed")]
    ChannelClosed,

    /// Failed to post a message
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a message
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Message serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::SerializationFailed(err.to_string())
    }
}

impl From<MeshError> for ConclaveError {
    fn from(err: MeshError) -> Self {
        ConclaveError::Channel(err.to_string())
    }
}
