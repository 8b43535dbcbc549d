//! Metadata store backed by SQLite.
//!
//! Holds the durable side of the engine: persona records, memory records
//! (with their original content and an optional embedding blob), and API
//! keys. The vector buffer itself is never persisted; on startup it is
//! rebuilt from the memory keyspace here.
//!
//! All operations are single-record-atomic. WAL mode keeps concurrent reads
//! cheap; a `Mutex<Connection>` serializes access from the synchronous call
//! sites.

mod apikey_ops;
mod memory_ops;
mod persona_ops;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::{MemoryError, Result};

pub use apikey_ops::{ApiKeyRecord, Permission};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Metadata Store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed record store for personas, memories, and API keys.
pub struct MetadataStore {
    pub(crate) conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open or create a store at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MemoryError::Migration(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        info!("Metadata store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Apply pragmas and migrate the schema to the current version.
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        self.migrate(&conn)?;
        Ok(())
    }

    /// Idempotent schema migration driven by `user_version`.
    fn migrate(&self, conn: &Connection) -> Result<()> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating schema from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        conn.execute_batch(
            r#"
            -- Personas: one row per memory container
            CREATE TABLE IF NOT EXISTS personas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                system_prompt TEXT,
                max_memory_size INTEGER NOT NULL,
                memory_decay_ms INTEGER NOT NULL,
                embedding_model TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Memory records; the embedding blob is optional and vectors are
            -- reinserted into the in-process store on startup
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                persona_id TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
                memory_type TEXT NOT NULL,
                importance REAL NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                conversation_id TEXT,
                speaker TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                context TEXT,
                embedding BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_memories_persona_id
                ON memories(persona_id);
            CREATE INDEX IF NOT EXISTS idx_memories_conversation_id
                ON memories(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_memories_created_at
                ON memories(created_at);

            -- API keys for the wire layer; only the salted hash is stored
            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                key_hash BLOB NOT NULL,
                salt BLOB NOT NULL,
                permissions TEXT NOT NULL,
                rate_limit_rpm INTEGER,
                expires_at TEXT,
                revoked INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_used_at TEXT
            );
            "#,
        )?;

        if current_version < 2 {
            self.migrate_v2(conn)?;
        }

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!("Schema ready (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Migration v2: rebuild legacy `memories` tables missing the
    /// `tags`/`context`/`embedding` columns.
    ///
    /// SQLite cannot add a column with a non-constant default to a table
    /// some versions created differently, so legacy tables are recreated
    /// with a rename-copy-drop: rename the old table aside, create the full
    /// schema, copy rows across (ids preserved), drop the old table. A
    /// database already carrying the columns passes straight through, which
    /// keeps the migration idempotent.
    fn migrate_v2(&self, conn: &Connection) -> Result<()> {
        let has_tags = conn.prepare("SELECT tags FROM memories LIMIT 0").is_ok();
        if has_tags {
            debug!("Migration v2: memories table already current");
            return Ok(());
        }

        info!("Running migration v2: rebuilding legacy memories table");
        conn.execute_batch(
            r#"
            ALTER TABLE memories RENAME TO memories_legacy;

            CREATE TABLE memories (
                id TEXT PRIMARY KEY,
                persona_id TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
                memory_type TEXT NOT NULL,
                importance REAL NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                conversation_id TEXT,
                speaker TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                context TEXT,
                embedding BLOB
            );

            INSERT INTO memories (id, persona_id, memory_type, importance, content,
                                  created_at, last_accessed, access_count,
                                  conversation_id, speaker)
                SELECT id, persona_id, memory_type, importance, content,
                       created_at, last_accessed, access_count,
                       conversation_id, speaker
                FROM memories_legacy;

            DROP TABLE memories_legacy;

            CREATE INDEX IF NOT EXISTS idx_memories_persona_id
                ON memories(persona_id);
            CREATE INDEX IF NOT EXISTS idx_memories_conversation_id
                ON memories(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_memories_created_at
                ON memories(created_at);
            "#,
        )?;

        info!("Migration v2 complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let store = MetadataStore::open_in_memory().unwrap();
        let conn = store.conn.lock().unwrap();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_open_file_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reverie.db");

        {
            let _store = MetadataStore::open(&path).unwrap();
        }
        // Second open migrates idempotently.
        let _store = MetadataStore::open(&path).unwrap();
    }

    #[test]
    fn test_migrate_v2_rebuilds_legacy_table() {
        let conn = Connection::open_in_memory().unwrap();
        // Simulate a v1 database: memories without tags/context/embedding.
        conn.execute_batch(
            r#"
            CREATE TABLE personas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                system_prompt TEXT,
                max_memory_size INTEGER NOT NULL,
                memory_decay_ms INTEGER NOT NULL,
                embedding_model TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE memories (
                id TEXT PRIMARY KEY,
                persona_id TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                importance REAL NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                conversation_id TEXT,
                speaker TEXT
            );
            INSERT INTO personas VALUES ('p1', 'Test', NULL, NULL, 100, 3600000, NULL,
                                         '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
            INSERT INTO memories VALUES ('m1', 'p1', 'fact', 0.5, 'legacy row',
                                         '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z',
                                         0, NULL, NULL);
            PRAGMA user_version = 1;
            "#,
        )
        .unwrap();

        let store = MetadataStore {
            conn: Mutex::new(conn),
        };
        store.initialize().unwrap();

        // Row survives with its id, and the new columns exist with defaults.
        let conn = store.conn.lock().unwrap();
        let (content, tags): (String, String) = conn
            .query_row(
                "SELECT content, tags FROM memories WHERE id = 'm1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(content, "legacy row");
        assert_eq!(tags, "[]");
    }
}
