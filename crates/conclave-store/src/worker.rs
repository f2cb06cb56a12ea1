//! The single shared storage engine of a session group
//!
//! One SQLite connection sits behind a mutex. Every statement, from every
//! instance, runs through it on Tokio's blocking pool, so callers never block
//! the event loop and all queries are applied in a single total order.

use async_trait::async_trait;
use conclave_core::DatabaseError;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::migrations::MigrationEngine;
use crate::value::sql_to_json;

pub use rusqlite::types::Value as SqlValue;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, DatabaseError>;

/// Rows returned by [`StorageEngine::query`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The narrow storage capability: run a parameterised statement, get rows.
///
/// Transactional guarantees are those of the underlying engine.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> StoreResult<QueryRows>;

    /// Run a statement that returns no rows; yields the affected row count
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> StoreResult<usize>;
}

/// Connection settings for the shared worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `None` opens a private in-memory database
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u32,
    pub cache_size_kb: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
            cache_size_kb: 16 * 1024,
        }
    }
}

impl WorkerConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Serialized access to the session group's database
pub struct SharedWorker {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl std::fmt::Debug for SharedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWorker")
            .field("location", &self.location)
            .finish()
    }
}

impl SharedWorker {
    /// Open the database, apply pragmas and bring the schema up to date
    pub fn open(config: &WorkerConfig) -> StoreResult<Self> {
        let (conn, location) = match &config.path {
            Some(path) => (Self::open_file(path)?, path.display().to_string()),
            None => (
                Connection::open_in_memory().map_err(|e| sqlite_error(&e, None))?,
                ":memory:".to_string(),
            ),
        };

        let mut pragmas = Vec::new();
        if config.path.is_some() {
            pragmas.push("PRAGMA journal_mode = WAL;".to_string());
        }
        pragmas.push("PRAGMA synchronous = NORMAL;".to_string());
        pragmas.push(format!("PRAGMA cache_size = -{};", config.cache_size_kb));
        pragmas.push(format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms));
        pragmas.push("PRAGMA foreign_keys = ON;".to_string());
        conn.execute_batch(&pragmas.join("\n"))
            .map_err(|e| sqlite_error(&e, None))?;

        MigrationEngine::new().migrate(&conn, None)?;

        info!(location = %location, "Shared worker opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::open(&WorkerConfig::in_memory())
    }

    fn open_file(path: &Path) -> StoreResult<Connection> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                return Err(DatabaseError::new(format!(
                    "database directory does not exist: {}",
                    parent.display()
                )));
            }
        }
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| sqlite_error(&e, None))
    }

    /// Where the database lives, for logging
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// The closure holds the connection exclusively, so a transaction opened
    /// inside it is never interleaved with another caller's statements.
    pub async fn call<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| DatabaseError::new("shared worker connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| DatabaseError::new(format!("shared worker task failed: {e}")))?
    }
}

#[async_trait]
impl StorageEngine for SharedWorker {
    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> StoreResult<QueryRows> {
        let sql = sql.to_string();
        debug!(sql = %sql, params = params.len(), "Running query");
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| sqlite_error(&e, Some(&sql)))?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

            let mut rows = stmt
                .query(params_from_iter(params.iter()))
                .map_err(|e| sqlite_error(&e, Some(&sql)))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| sqlite_error(&e, Some(&sql)))? {
                let mut object = serde_json::Map::with_capacity(columns.len());
                for (index, name) in columns.iter().enumerate() {
                    let value = row
                        .get_ref(index)
                        .map_err(|e| sqlite_error(&e, Some(&sql)))?;
                    object.insert(name.clone(), sql_to_json(value));
                }
                out.push(object);
            }

            Ok(QueryRows { columns, rows: out })
        })
        .await
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> StoreResult<usize> {
        let sql = sql.to_string();
        self.call(move |conn| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(|e| sqlite_error(&e, Some(&sql)))
        })
        .await
    }
}

/// Convert a driver error into a [`DatabaseError`] without leaking internals
pub fn sqlite_error(error: &rusqlite::Error, query: Option<&str>) -> DatabaseError {
    let message = match error {
        rusqlite::Error::QueryReturnedNoRows => "No rows returned".to_string(),
        rusqlite::Error::InvalidColumnIndex(_) => "Invalid column index".to_string(),
        rusqlite::Error::InvalidColumnName(_) => "Invalid column name".to_string(),
        rusqlite::Error::InvalidPath(_) => "Invalid database path".to_string(),
        rusqlite::Error::InvalidColumnType(_, name, _) => {
            format!("Invalid column type for '{name}'")
        }
        rusqlite::Error::StatementChangedRows(_) => "Unexpected row count".to_string(),
        rusqlite::Error::IntegralValueOutOfRange(_, _) => "Value out of range".to_string(),
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
        other => other.to_string(),
    };
    let error = DatabaseError::new(message);
    match query {
        Some(query) => error.with_query(query),
        None => error,
    }
}
