//! Storage failures

use thiserror::Error;

/// A storage operation failed. Surfaced to the caller, never retried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Database error: {message}")]
pub struct DatabaseError {
    pub message: String,
    /// The statement that failed, when one is known
    pub query: Option<String>,
}

impl DatabaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            query: None,
        }
    }

    /// Attach the statement that produced this error
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}
