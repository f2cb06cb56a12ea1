//! # Conclave Store
//!
//! Persistence for a Conclave session group. Every instance talks to one
//! [`SharedWorker`], a single SQLite connection that serializes all
//! statements. On top of it sit the [`ContextManager`] (named session state
//! with save-before-switch) and the [`GenerationRepository`] (generated media,
//! similarity search and a per-instance segmentation cache).
//!
//! ```no_run
//! use conclave_store::{ContextManager, SharedWorker};
//! use conclave_core::ContextId;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let worker = Arc::new(SharedWorker::in_memory()?);
//! let contexts = ContextManager::new(worker);
//! let id = ContextId::parse("default")?;
//! contexts.create_context(id.clone(), "chat", None).await?;
//! contexts.switch_context(&id).await?;
//! contexts.append_history("user", "hello").await?;
//! contexts.save_context_state(&id).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod context;
pub mod generations;
pub mod migrations;
pub mod value;
pub mod vector;
pub mod worker;

pub use cache::{CacheStats, InsertionOrderCache, SegmentationCache};
pub use context::{ContextConfig, ContextManager, ContextRecord, HistoryEntry};
pub use generations::{
    DEFAULT_SEARCH_LIMIT, DEFAULT_SEARCH_THRESHOLD, GenerationQuery, GenerationRecord,
    GenerationRepository, NewGeneration, SearchHit, record_summary,
};
pub use migrations::{Migration, MigrationEngine, MigrationStatus};
pub use value::{json_to_sql, sql_to_json};
pub use vector::{blob_to_f32_vec, cosine_similarity, f32_slice_to_blob};
pub use worker::{
    QueryRows, SharedWorker, SqlValue, StorageEngine, StoreResult, WorkerConfig, sqlite_error,
};
