//! Context manager errors

use super::DatabaseError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    /// No record exists in memory or in the store
    #[error("Context not found: {id}")]
    NotFound { id: String },

    /// A record with this id already exists with a different role
    #[error("Context '{id}' already exists with role '{existing_role}', requested '{requested_role}'")]
    Conflict {
        id: String,
        existing_role: String,
        requested_role: String,
    },

    /// An operation needed an active context and none was set
    #[error("No context is active")]
    NoActiveContext,

    #[error("Context '{id}' could not be encoded: {message}")]
    Serialization { id: String, message: String },

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

impl ContextError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

/// Result type for context operations
pub type ContextResult<T> = Result<T, ContextError>;
