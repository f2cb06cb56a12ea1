//! Tool-call request and response envelopes
//!
//! The request boundary never fails: every outcome, including unknown tools,
//! bad arguments, handler errors and handler panics, comes back as a
//! well-formed response, with `isError` set when something went wrong.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tracing::{error, info};

use crate::registry::ToolRegistry;

/// `{name, arguments}` as received from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResponse {
    /// Successful result, carried as its JSON text
    pub fn success(result: &Value) -> Self {
        Self {
            content: vec![ContentBlock::Text {
                text: result.to_string(),
            }],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Text of the first content block
    pub fn text(&self) -> &str {
        match self.content.first() {
            Some(ContentBlock::Text { text }) => text,
            None => "",
        }
    }
}

/// Dispatch one request and wrap the outcome
pub async fn handle_call(registry: &ToolRegistry, request: ToolCallRequest) -> ToolCallResponse {
    let ToolCallRequest { name, arguments } = request;
    let outcome = AssertUnwindSafe(registry.execute(&name, arguments))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(result)) => {
            info!(tool = %name, "Tool call succeeded");
            ToolCallResponse::success(&result)
        }
        Ok(Err(e)) => {
            info!(tool = %name, error = %e, "Tool call failed");
            ToolCallResponse::error(e.to_string())
        }
        Err(_) => {
            error!(tool = %name, "Tool handler panicked");
            ToolCallResponse::error(format!("Tool '{name}' panicked"))
        }
    }
}

/// Handle one JSON-encoded request line and return the JSON-encoded response
pub async fn handle_line(registry: &ToolRegistry, line: &str) -> String {
    let response = match serde_json::from_str::<ToolCallRequest>(line) {
        Ok(request) => handle_call(registry, request).await,
        Err(e) => ToolCallResponse::error(format!("Malformed request: {e}")),
    };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(r#"{{"content":[{{"type":"text","text":"encoding failed: {e}"}}],"isError":true}}"#)
    })
}
