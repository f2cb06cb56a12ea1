//! SQLite schema migration engine
//!
//! Versioned up/down scripts tracked in a `schema_migrations` table. Each
//! migration applies inside its own transaction.

use conclave_core::DatabaseError;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::worker::{StoreResult, sqlite_error};

/// Individual migration definition
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
    pub down: Option<&'static str>,
}

/// Status information about database migrations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub current_version: u32,
    pub latest_version: u32,
    pub pending_migrations: Vec<u32>,
}

/// Migration engine for the shared schema
pub struct MigrationEngine {
    migrations: Vec<Migration>,
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationEngine {
    pub fn new() -> Self {
        Self {
            migrations: Self::default_migrations(),
        }
    }

    fn default_migrations() -> Vec<Migration> {
        vec![Migration {
            version: 1,
            description: "Create generations and context_states",
            up: r#"
                CREATE TABLE IF NOT EXISTS generations (
                    id TEXT PRIMARY KEY,
                    type TEXT NOT NULL CHECK (type IN ('image', 'music', 'sprite_video')),
                    prompt TEXT NOT NULL,
                    content BLOB NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    sprite_frames INTEGER DEFAULT 4,
                    bpm INTEGER DEFAULT 120,
                    embedding BLOB,
                    metadata TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(metadata))
                );

                CREATE INDEX IF NOT EXISTS idx_generations_type ON generations(type);
                CREATE INDEX IF NOT EXISTS idx_generations_created_at ON generations(created_at);

                CREATE TABLE IF NOT EXISTS context_states (
                    id TEXT PRIMARY KEY,
                    role TEXT NOT NULL,
                    state TEXT NOT NULL CHECK (json_valid(state)),
                    history TEXT NOT NULL CHECK (json_valid(history)),
                    config TEXT NOT NULL CHECK (json_valid(config)),
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                );

                CREATE INDEX IF NOT EXISTS idx_context_states_role ON context_states(role);
            "#,
            down: Some(
                r#"
                DROP TABLE IF EXISTS context_states;
                DROP TABLE IF EXISTS generations;
            "#,
            ),
        }]
    }

    fn latest_version(&self) -> u32 {
        self.migrations.iter().map(|m| m.version).max().unwrap_or(0)
    }

    fn ensure_tracking_table(conn: &Connection) -> StoreResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )
        .map_err(|e| sqlite_error(&e, None))?;
        Ok(())
    }

    fn current_version(conn: &Connection) -> StoreResult<u32> {
        let version: Option<u32> = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| sqlite_error(&e, None))?
            .flatten();
        Ok(version.unwrap_or(0))
    }

    /// Apply pending migrations up to `target_version` (default: latest)
    pub fn migrate(&self, conn: &Connection, target_version: Option<u32>) -> StoreResult<()> {
        Self::ensure_tracking_table(conn)?;
        let current = Self::current_version(conn)?;
        let target = target_version.unwrap_or_else(|| self.latest_version());

        for migration in &self.migrations {
            if migration.version > current && migration.version <= target {
                self.apply_migration(conn, migration)?;
            }
        }
        Ok(())
    }

    fn apply_migration(&self, conn: &Connection, migration: &Migration) -> StoreResult<()> {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| sqlite_error(&e, None))?;

        tx.execute_batch(migration.up).map_err(|e| {
            DatabaseError::new(format!("Migration {} failed: {}", migration.version, e))
        })?;

        tx.execute(
            "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )
        .map_err(|e| sqlite_error(&e, None))?;

        tx.commit().map_err(|e| sqlite_error(&e, None))?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );
        Ok(())
    }

    /// Roll back down to `target_version`, newest first
    pub fn rollback(&self, conn: &Connection, target_version: u32) -> StoreResult<()> {
        Self::ensure_tracking_table(conn)?;
        let current = Self::current_version(conn)?;

        let mut to_rollback: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version > target_version && m.version <= current)
            .collect();
        to_rollback.sort_by(|a, b| b.version.cmp(&a.version));

        for migration in to_rollback {
            let down = migration.down.ok_or_else(|| {
                DatabaseError::new(format!(
                    "Migration {} has no down migration defined",
                    migration.version
                ))
            })?;

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| sqlite_error(&e, None))?;
            tx.execute_batch(down).map_err(|e| {
                DatabaseError::new(format!(
                    "Rollback of migration {} failed: {}",
                    migration.version, e
                ))
            })?;
            tx.execute(
                "DELETE FROM schema_migrations WHERE version = ?1",
                params![migration.version],
            )
            .map_err(|e| sqlite_error(&e, None))?;
            tx.commit().map_err(|e| sqlite_error(&e, None))?;

            info!(version = migration.version, "Rolled back migration");
        }
        Ok(())
    }

    pub fn status(&self, conn: &Connection) -> StoreResult<MigrationStatus> {
        Self::ensure_tracking_table(conn)?;
        let current_version = Self::current_version(conn)?;
        Ok(MigrationStatus {
            current_version,
            latest_version: self.latest_version(),
            pending_migrations: self
                .migrations
                .iter()
                .filter(|m| m.version > current_version)
                .map(|m| m.version)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn migrates_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        let engine = MigrationEngine::new();
        assert_eq!(engine.status(&conn).unwrap().pending_migrations, vec![1]);

        engine.migrate(&conn, None).unwrap();

        assert!(table_exists(&conn, "generations"));
        assert!(table_exists(&conn, "context_states"));
        let status = engine.status(&conn).unwrap();
        assert_eq!(status.current_version, 1);
        assert!(status.pending_migrations.is_empty());
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let engine = MigrationEngine::new();
        engine.migrate(&conn, None).unwrap();
        engine.migrate(&conn, None).unwrap();
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn rollback_drops_tables() {
        let conn = Connection::open_in_memory().unwrap();
        let engine = MigrationEngine::new();
        engine.migrate(&conn, None).unwrap();
        engine.rollback(&conn, 0).unwrap();
        assert!(!table_exists(&conn, "generations"));
        assert_eq!(engine.status(&conn).unwrap().current_version, 0);
    }

    #[test]
    fn schema_enforces_media_type_and_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        MigrationEngine::new().migrate(&conn, None).unwrap();

        let bad = conn.execute(
            "INSERT INTO generations (id, type, prompt, content) VALUES ('x', 'video', 'p', x'00')",
            [],
        );
        assert!(bad.is_err());

        conn.execute(
            "INSERT INTO generations (id, type, prompt, content) VALUES ('y', 'music', 'p', x'00')",
            [],
        )
        .unwrap();
        let (frames, bpm, metadata): (i64, i64, String) = conn
            .query_row(
                "SELECT sprite_frames, bpm, metadata FROM generations WHERE id = 'y'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!((frames, bpm, metadata.as_str()), (4, 120, "{}"));
    }
}
