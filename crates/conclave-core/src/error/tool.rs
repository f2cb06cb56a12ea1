//! Tool dispatch errors

use super::ConclaveError;
use thiserror::Error;

/// Errors raised by tool registration and dispatch.
///
/// None of these are retried by the registry itself.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool is registered under the requested name
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    /// Arguments failed the tool's shape check; the handler was not invoked
    #[error("Invalid arguments for tool '{name}': {details}")]
    InvalidArguments { name: String, details: String },

    /// The handler ran and returned an error
    #[error("Tool '{name}' execution failed: {cause}")]
    ExecutionFailed {
        name: String,
        #[source]
        cause: Box<ConclaveError>,
    },

    /// A tool with this name is already registered
    #[error("Tool '{name}' is already registered")]
    AlreadyRegistered { name: String },
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_arguments(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            details: details.into(),
        }
    }

    pub fn execution_failed(name: impl Into<String>, cause: impl Into<ConclaveError>) -> Self {
        Self::ExecutionFailed {
            name: name.into(),
            cause: Box::new(cause.into()),
        }
    }

    /// Name of the tool this error concerns
    pub fn tool_name(&self) -> &str {
        match self {
            Self::NotFound { name }
            | Self::InvalidArguments { name, .. }
            | Self::ExecutionFailed { name, .. }
            | Self::AlreadyRegistered { name } => name,
        }
    }
}

/// Result type for tool operations
pub type ToolResult<T> = Result<T, ToolError>;
