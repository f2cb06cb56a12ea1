//! # Conclave Tools
//!
//! Named operations with typed argument contracts. A [`ToolRegistry`] maps
//! each [`ToolName`](conclave_core::ToolName) to an [`ArgumentShape`] and a
//! [`ToolHandler`]; dispatch validates first and only then runs the handler.
//! [`handle_call`] wraps the outcome in a response envelope so a failing tool
//! never takes the caller down with it.
//!
//! ```
//! use conclave_core::ToolName;
//! use conclave_tools::{ArgumentShape, ToolCallRequest, ToolRegistry, handle_call, handler_fn};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(
//!         ToolName::parse("echo").unwrap(),
//!         "Return the arguments",
//!         ArgumentShape::object([("text", ArgumentShape::string())]),
//!         handler_fn(|args| async move { Ok(args) }),
//!     )
//!     .unwrap();
//!
//! let response = handle_call(&registry, ToolCallRequest::new("echo", json!({"text": "hi"}))).await;
//! assert!(!response.is_error);
//! assert_eq!(response.text(), r#"{"text":"hi"}"#);
//! # });
//! ```

pub mod builtins;
pub mod envelope;
pub mod registry;
pub mod shape;

pub use builtins::{Services, builtin_registry, register_builtins};
pub use envelope::{ContentBlock, ToolCallRequest, ToolCallResponse, handle_call, handle_line};
pub use registry::{FnHandler, ToolDescriptor, ToolHandler, ToolRegistry, handler_fn};
pub use shape::{ArgumentShape, ShapeError, ShapeErrors};
