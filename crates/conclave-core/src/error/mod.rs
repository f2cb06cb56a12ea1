//! Error Types
//!
//! The taxonomy is split by concern:
//! - `generation`: media generation failures
//! - `database`: storage failures
//! - `network`: transport failures, the only retryable kind
//! - `tool`: registration and dispatch errors
//! - `context`: context manager errors
//! - `conversions`: the umbrella [`ConclaveError`] and [`Retryable`]

mod context;
mod conversions;
mod database;
mod generation;
mod network;
mod tool;

pub use context::{ContextError, ContextResult};
pub use conversions::{ConclaveError, ConclaveResult, Retryable};
pub use database::DatabaseError;
pub use generation::{GenerationError, GenerationErrorKind};
pub use network::NetworkError;
pub use tool::{ToolError, ToolResult};
