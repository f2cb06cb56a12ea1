//! `switchContext`

use conclave_core::{ConclaveResult, ContextError, ContextId};
use conclave_store::ContextManager;
use serde_json::{Value, json};

/// Switch to `context_id`, creating it with `role` first when one is given.
///
/// Returns a summary of the now-active record.
pub async fn switch(
    contexts: &ContextManager,
    context_id: &str,
    role: Option<String>,
) -> ConclaveResult<Value> {
    let id = ContextId::parse(context_id)?;
    if let Some(role) = role {
        contexts.create_context(id.clone(), role, None).await?;
    }
    contexts.switch_context(&id).await?;

    let record = contexts
        .current_context()
        .await
        .ok_or(ContextError::NoActiveContext)?;
    Ok(json!({
        "success": true,
        "id": record.id,
        "role": record.role,
        "historyLength": record.history.len(),
        "state": record.state,
        "config": record.config,
    }))
}
