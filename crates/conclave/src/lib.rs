//! # Conclave
//!
//! Conclave lets several instances in one session group share a single
//! embedded database while electing exactly one of them to run background
//! maintenance. Every instance can dispatch schema-validated tools and keep
//! named conversation contexts that survive switches and restarts.
//!
//! ## Core Components
//!
//! - **[SessionGroup]**: the broadcast bus and the shared worker its members use
//! - **[Instance]**: one member; owns its elector, context manager, repository and tool registry
//! - **[Capabilities]**: the generator, embedder and segmenter an instance delegates to
//! - **[maintenance]**: duties only the leader performs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conclave::{Capabilities, ConclaveConfig, Instance, SessionGroup, ToolCallRequest};
//! use serde_json::json;
//!
//! # async fn run() -> conclave::ConclaveResult<()> {
//! let config = ConclaveConfig::from_env()?;
//! let group = SessionGroup::new(&config);
//! let instance = Instance::start(&group, config, Capabilities::default()).await?;
//!
//! let response = instance
//!     .call_tool(ToolCallRequest::new("naturalToSql", json!({"natural": "latest"})))
//!     .await;
//! println!("{}", response.text());
//!
//! instance.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Module aliases for namespaced access
// ============================================================================

pub use conclave_core as core;
pub use conclave_mesh as mesh;
pub use conclave_store as store;
pub use conclave_tools as tools;

#[cfg(feature = "testing")]
pub use conclave_testing as testing;

pub mod capabilities;
pub mod group;
pub mod instance;
pub mod maintenance;

// ============================================================================
// Convenience re-exports
// ============================================================================

pub use capabilities::Capabilities;
pub use group::SessionGroup;
pub use instance::Instance;

pub use conclave_core::{
    ConclaveConfig, ConclaveError, ConclaveResult, ContextId, GenerationId, InstanceId,
    MediaKind, ToolName,
};
pub use conclave_mesh::{ElectionConfig, LeaderElector};
pub use conclave_store::{ContextConfig, ContextManager, ContextRecord, GenerationRepository};
pub use conclave_tools::{ToolCallRequest, ToolCallResponse, ToolDescriptor, ToolRegistry};
