//! Named conversational contexts with save-before-switch semantics
//!
//! Each instance keeps its own in-memory table of context records and one
//! active pointer. Records reach the shared store only through
//! [`ContextManager::save_context_state`] (called explicitly, or implicitly
//! when switching away from a context), so memory and store agree right after
//! a save or load and may drift in between.

use conclave_core::{ContextError, ContextId, ContextResult};
use futures::FutureExt;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::worker::{SharedWorker, sqlite_error};

/// Sampling settings carried with a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextConfig {
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
            stop_sequences: Vec::new(),
        }
    }
}

/// One turn of conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A persisted unit of session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub id: ContextId,
    pub role: String,
    pub state: BTreeMap<String, Value>,
    pub history: Vec<HistoryEntry>,
    pub config: ContextConfig,
}

impl ContextRecord {
    pub fn new(id: ContextId, role: impl Into<String>, config: ContextConfig) -> Self {
        Self {
            id,
            role: role.into(),
            state: BTreeMap::new(),
            history: Vec::new(),
            config,
        }
    }
}

#[derive(Debug, Default)]
struct ContextTable {
    records: HashMap<ContextId, ContextRecord>,
    current: Option<ContextId>,
}

/// Serialized columns of a `context_states` row
struct EncodedRecord {
    role: String,
    state: String,
    history: String,
    config: String,
}

impl EncodedRecord {
    fn encode(record: &ContextRecord) -> ContextResult<Self> {
        let fail = |e: serde_json::Error| ContextError::Serialization {
            id: record.id.to_string(),
            message: e.to_string(),
        };
        Ok(Self {
            role: record.role.clone(),
            state: serde_json::to_string(&record.state).map_err(fail)?,
            history: serde_json::to_string(&record.history).map_err(fail)?,
            config: serde_json::to_string(&record.config).map_err(fail)?,
        })
    }

    fn decode(self, id: ContextId) -> ContextResult<ContextRecord> {
        let fail = |e: serde_json::Error| ContextError::Serialization {
            id: id.to_string(),
            message: e.to_string(),
        };
        Ok(ContextRecord {
            role: self.role,
            state: serde_json::from_str(&self.state).map_err(fail)?,
            history: serde_json::from_str(&self.history).map_err(fail)?,
            config: serde_json::from_str(&self.config).map_err(fail)?,
            id,
        })
    }
}

/// Owns this instance's context records and the active-context pointer.
///
/// Operations that touch the store hold the table lock for their whole
/// duration, so within one instance a switch's save always completes before
/// its load begins and no two switches interleave.
pub struct ContextManager {
    worker: Arc<SharedWorker>,
    table: Mutex<ContextTable>,
}

impl ContextManager {
    pub fn new(worker: Arc<SharedWorker>) -> Self {
        Self {
            worker,
            table: Mutex::new(ContextTable::default()),
        }
    }

    /// Create a context, or return the existing one when it already has the
    /// requested role.
    ///
    /// A record found only in the store is loaded into memory first. An
    /// existing record with a different role is a [`ContextError::Conflict`];
    /// nothing is replaced silently. New records are not persisted until saved.
    pub async fn create_context(
        &self,
        id: ContextId,
        role: impl Into<String>,
        config: Option<ContextConfig>,
    ) -> ContextResult<ContextRecord> {
        let role = role.into();
        let mut table = self.table.lock().await;

        if !table.records.contains_key(&id) {
            if let Some(stored) = self.fetch(&id).await? {
                table.records.insert(id.clone(), stored);
            }
        }

        if let Some(existing) = table.records.get(&id) {
            if existing.role != role {
                return Err(ContextError::Conflict {
                    id: id.to_string(),
                    existing_role: existing.role.clone(),
                    requested_role: role,
                });
            }
            debug!(context_id = %id, "Context already exists");
            return Ok(existing.clone());
        }

        let record = ContextRecord::new(id.clone(), role, config.unwrap_or_default());
        table.records.insert(id.clone(), record.clone());
        info!(context_id = %id, role = %record.role, "Context created");
        Ok(record)
    }

    /// Save the active context, load `id`, and make it active.
    ///
    /// If the save fails the switch is abandoned and the active pointer is
    /// unchanged. Fails with [`ContextError::NotFound`] when `id` exists
    /// neither in memory nor in the store.
    pub async fn switch_context(&self, id: &ContextId) -> ContextResult<()> {
        let mut table = self.table.lock().await;
        self.switch_locked(&mut table, id).await
    }

    async fn switch_locked(&self, table: &mut ContextTable, id: &ContextId) -> ContextResult<()> {
        if let Some(active) = table.current.clone() {
            if let Some(record) = table.records.get(&active) {
                self.persist(record).await?;
            }
        }

        match self.fetch(id).await? {
            Some(stored) => {
                table.records.insert(id.clone(), stored);
            }
            None if table.records.contains_key(id) => {}
            None => return Err(ContextError::not_found(id.as_str())),
        }

        let previous = table.current.replace(id.clone());
        info!(
            from = previous.as_ref().map(|p| p.as_str()).unwrap_or("<none>"),
            to = %id,
            "Switched context"
        );
        Ok(())
    }

    /// Upsert the in-memory record for `id` into the store
    pub async fn save_context_state(&self, id: &ContextId) -> ContextResult<()> {
        let table = self.table.lock().await;
        let record = table
            .records
            .get(id)
            .ok_or_else(|| ContextError::not_found(id.as_str()))?;
        self.persist(record).await
    }

    /// Replace the in-memory record for `id` with the stored one.
    ///
    /// Fails with [`ContextError::NotFound`] if the store has no such record,
    /// leaving memory untouched.
    pub async fn load_context_state(&self, id: &ContextId) -> ContextResult<()> {
        let mut table = self.table.lock().await;
        let stored = self
            .fetch(id)
            .await?
            .ok_or_else(|| ContextError::not_found(id.as_str()))?;
        table.records.insert(id.clone(), stored);
        debug!(context_id = %id, "Loaded context state");
        Ok(())
    }

    /// Run `action` with `id` active, then restore whatever was active before.
    ///
    /// Restoration happens on every exit path: success, error, and panic (the
    /// panic is resumed afterwards). With no previously active context the
    /// target is saved and the pointer cleared. If the action succeeds but
    /// restoration fails, the restoration error is returned; if both fail, the
    /// action's error wins and the restoration failure is logged.
    pub async fn execute_in_context<F, Fut, T, E>(&self, id: &ContextId, action: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ContextError>,
    {
        let previous = self.current_context_id().await;
        self.switch_context(id).await?;

        let outcome = AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await;

        let restored = self.restore(previous.as_ref()).await;

        match outcome {
            Ok(Ok(value)) => {
                restored?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(restore_err) = restored {
                    error!(context_id = %id, error = %restore_err, "Failed to restore context after action error");
                }
                Err(err)
            }
            Err(panic) => {
                if let Err(restore_err) = restored {
                    error!(context_id = %id, error = %restore_err, "Failed to restore context after panic");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn restore(&self, previous: Option<&ContextId>) -> ContextResult<()> {
        let mut table = self.table.lock().await;
        match previous {
            Some(previous) => self.switch_locked(&mut table, previous).await,
            None => {
                if let Some(active) = table.current.take() {
                    if let Some(record) = table.records.get(&active) {
                        self.persist(record).await?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Save the active context, if any
    pub async fn save_current(&self) -> ContextResult<()> {
        let table = self.table.lock().await;
        match table.current.as_ref().and_then(|id| table.records.get(id)) {
            Some(record) => self.persist(record).await,
            None => Ok(()),
        }
    }

    pub async fn current_context_id(&self) -> Option<ContextId> {
        self.table.lock().await.current.clone()
    }

    /// Snapshot of the active record
    pub async fn current_context(&self) -> Option<ContextRecord> {
        let table = self.table.lock().await;
        table
            .current
            .as_ref()
            .and_then(|id| table.records.get(id))
            .cloned()
    }

    /// Snapshot of an in-memory record
    pub async fn get_context(&self, id: &ContextId) -> Option<ContextRecord> {
        self.table.lock().await.records.get(id).cloned()
    }

    /// Append a turn to the active context's history
    pub async fn append_history(
        &self,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> ContextResult<()> {
        let entry = HistoryEntry::new(role, content);
        self.with_current(|record| record.history.push(entry)).await
    }

    /// Set a state key on the active context
    pub async fn set_state(&self, key: impl Into<String>, value: Value) -> ContextResult<()> {
        let key = key.into();
        self.with_current(|record| {
            record.state.insert(key, value);
        })
        .await
    }

    async fn with_current<F>(&self, mutate: F) -> ContextResult<()>
    where
        F: FnOnce(&mut ContextRecord),
    {
        let mut table = self.table.lock().await;
        let ContextTable { records, current } = &mut *table;
        let id = current.as_ref().ok_or(ContextError::NoActiveContext)?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| ContextError::not_found(id.as_str()))?;
        mutate(record);
        Ok(())
    }

    /// Whether the store holds a record for `id`
    pub async fn is_persisted(&self, id: &ContextId) -> ContextResult<bool> {
        Ok(self.fetch(id).await?.is_some())
    }

    /// Ids of all stored contexts, ordered by id
    pub async fn list_persisted(&self) -> ContextResult<Vec<ContextId>> {
        let ids: Vec<String> = self
            .worker
            .call(|conn| {
                let sql = "SELECT id FROM context_states ORDER BY id";
                let mut stmt = conn.prepare(sql).map_err(|e| sqlite_error(&e, Some(sql)))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|e| sqlite_error(&e, Some(sql)))?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(|e| sqlite_error(&e, Some(sql)))
            })
            .await?;
        Ok(ids.into_iter().map(ContextId::new_unchecked).collect())
    }

    async fn persist(&self, record: &ContextRecord) -> ContextResult<()> {
        let encoded = EncodedRecord::encode(record)?;
        let id = record.id.to_string();
        let changed = self
            .worker
            .call(move |conn| {
                let sql = "INSERT INTO context_states (id, role, state, history, config)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        role = excluded.role,
                        state = excluded.state,
                        history = excluded.history,
                        config = excluded.config,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE context_states.role IS NOT excluded.role
                        OR context_states.state IS NOT excluded.state
                        OR context_states.history IS NOT excluded.history
                        OR context_states.config IS NOT excluded.config";
                conn.execute(
                    sql,
                    params![
                        id,
                        encoded.role,
                        encoded.state,
                        encoded.history,
                        encoded.config
                    ],
                )
                .map_err(|e| sqlite_error(&e, Some(sql)))
            })
            .await?;
        debug!(context_id = %record.id, changed, "Saved context state");
        Ok(())
    }

    async fn fetch(&self, id: &ContextId) -> ContextResult<Option<ContextRecord>> {
        let key = id.to_string();
        let row = self
            .worker
            .call(move |conn| {
                let sql = "SELECT role, state, history, config FROM context_states WHERE id = ?1";
                conn.query_row(sql, params![key], |row| {
                    Ok(EncodedRecord {
                        role: row.get(0)?,
                        state: row.get(1)?,
                        history: row.get(2)?,
                        config: row.get(3)?,
                    })
                })
                .optional()
                .map_err(|e| sqlite_error(&e, Some(sql)))
            })
            .await?;
        row.map(|encoded| encoded.decode(id.clone())).transpose()
    }
}
