//! Name-to-handler table with validation before dispatch

use async_trait::async_trait;
use conclave_core::{ConclaveResult, ToolError, ToolName, ToolResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::shape::ArgumentShape;

/// The body of a tool. Receives arguments that already satisfy the tool's
/// shape, with undeclared keys removed.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> ConclaveResult<Value>;
}

/// Adapter that lets an async closure act as a [`ToolHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = ConclaveResult<Value>> + Send,
{
    async fn call(&self, args: Value) -> ConclaveResult<Value> {
        (self.0)(args).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConclaveResult<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct ToolEntry {
    description: String,
    shape: ArgumentShape,
    handler: Arc<dyn ToolHandler>,
}

/// Listing entry for one registered tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub description: String,
    pub input_schema: Value,
}

/// Registered tools, keyed by name.
///
/// Populated once at startup and read-only afterwards; share it behind an
/// `Arc` once registration is done.
#[derive(Default)]
pub struct ToolRegistry {
    entries: BTreeMap<ToolName, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// [`ToolError::AlreadyRegistered`] if the name is taken; the existing
    /// entry is left untouched.
    pub fn register(
        &mut self,
        name: ToolName,
        description: impl Into<String>,
        shape: ArgumentShape,
        handler: Arc<dyn ToolHandler>,
    ) -> ToolResult<()> {
        if self.entries.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        debug!(tool = %name, "Registered tool");
        self.entries.insert(
            name,
            ToolEntry {
                description: description.into(),
                shape,
                handler,
            },
        );
        Ok(())
    }

    /// Look up, validate and run a tool.
    ///
    /// The handler is never invoked when validation fails.
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult<Value> {
        let entry = ToolName::parse(name)
            .ok()
            .and_then(|key| self.entries.get(&key))
            .ok_or_else(|| ToolError::not_found(name))?;

        let args = entry.shape.validate(&args).map_err(|errors| {
            debug!(tool = %name, details = %errors, "Rejected tool arguments");
            ToolError::invalid_arguments(name, errors.to_string())
        })?;

        debug!(tool = %name, "Executing tool");
        entry.handler.call(args).await.map_err(|cause| {
            warn!(tool = %name, error = %cause, "Tool execution failed");
            ToolError::execution_failed(name, cause)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        ToolName::parse(name)
            .map(|key| self.entries.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered tools in name order
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.entries
            .iter()
            .map(|(name, entry)| ToolDescriptor {
                name: name.clone(),
                description: entry.description.clone(),
                input_schema: entry.shape.to_json_schema(),
            })
            .collect()
    }
}
