//! Media generation failures

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a generation request did not produce an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    /// The pipeline ran and reported a failure
    Failed,
    /// An interrupt signal aborted the request
    Interrupted,
    /// No pipeline is wired for this capability
    Unavailable,
    /// The request was rejected before the pipeline ran
    InvalidRequest,
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Unavailable => "unavailable",
            Self::InvalidRequest => "invalid request",
        };
        f.write_str(label)
    }
}

/// A requested media generation failed. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Generation {kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Failed, message)
    }

    pub fn interrupted() -> Self {
        Self::new(GenerationErrorKind::Interrupted, "generation was interrupted")
    }

    pub fn unavailable(capability: &str) -> Self {
        Self::new(
            GenerationErrorKind::Unavailable,
            format!("no {capability} pipeline is configured"),
        )
    }
}
