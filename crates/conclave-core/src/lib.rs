//! # Conclave Core
//!
//! Shared building blocks for the Conclave runtime: validated identifiers,
//! the error taxonomy, the explicit retry helper, the external capability
//! traits (generation, embedding, segmentation) and environment configuration.

pub mod capability;
pub mod config;
pub mod error;
pub mod identifiers;
pub mod retry;

pub use capability::{
    Embedder, GeneratedAsset, GenerationRequest, Generator, Interrupt, MediaKind, Segmentation,
    Segmenter, Unavailable, run_generation,
};
pub use config::{ConclaveConfig, ConclaveConfigBuilder, ConfigError};
pub use error::{
    ConclaveError, ConclaveResult, ContextError, ContextResult, DatabaseError, GenerationError,
    GenerationErrorKind, NetworkError, Retryable, ToolError, ToolResult,
};
pub use identifiers::{ContextId, GenerationId, IdValidationError, InstanceId, ToolName};
pub use retry::{RetryPolicy, with_retry};
