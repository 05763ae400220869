//! Durable document database backed by SQLite.
//!
//! Stores opaque JSON documents under string keys. The schema is a single table,
//! created on first open; there is no migration history yet.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Document database connection wrapper
pub struct DocumentDb {
    conn: Mutex<Connection>,
}

impl DocumentDb {
    /// Open or create a document database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        debug!(path = %path.display(), "Opening document database");

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create database schema")?;

        info!("Document database ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Document database lock poisoned"))
    }

    /// Fetch a document body by key
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT body FROM documents WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read document {}", key))
    }

    /// Insert or replace a document body
    pub fn set(&self, key: &str, body: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO documents (key, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![key, body, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to write document {}", key))?;
        Ok(())
    }

    /// Delete a document; returns whether it existed
    pub fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM documents WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to delete document {}", key))?;
        Ok(removed > 0)
    }

    /// Every document key, in key order
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key FROM documents ORDER BY key")
            .context("Failed to prepare key listing")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to list document keys")?;
        Ok(keys)
    }

    /// Number of stored documents
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_database() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("nested").join("cache.db");

        let db = DocumentDb::open(&db_path)?;
        assert!(db_path.exists());
        assert_eq!(db.count()?, 0);

        Ok(())
    }

    #[test]
    fn test_set_get_overwrite() -> Result<()> {
        let db = DocumentDb::open_in_memory()?;

        assert_eq!(db.get("search_frieren")?, None);

        db.set("search_frieren", r#"{"data":[]}"#)?;
        db.set("search_frieren", r#"{"data":[1]}"#)?;

        assert_eq!(db.get("search_frieren")?.as_deref(), Some(r#"{"data":[1]}"#));
        assert_eq!(db.count()?, 1);

        Ok(())
    }

    #[test]
    fn test_delete() -> Result<()> {
        let db = DocumentDb::open_in_memory()?;
        db.set("k", "v")?;
        assert!(db.delete("k")?);
        assert!(!db.delete("k")?);
        assert_eq!(db.get("k")?, None);
        Ok(())
    }

    #[test]
    fn test_keys_listed_in_order() -> Result<()> {
        let db = DocumentDb::open_in_memory()?;
        assert!(db.keys()?.is_empty());

        db.set("streams_abc_e1", "{}")?;
        db.set("episodes_abc_1", "{}")?;
        db.set("search_frieren", "{}")?;

        assert_eq!(
            db.keys()?,
            vec!["episodes_abc_1", "search_frieren", "streams_abc_e1"]
        );
        Ok(())
    }

    #[test]
    fn test_persists_across_reopen() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("cache.db");

        DocumentDb::open(&db_path)?.set("streams_abc_e1", "{}")?;
        let reopened = DocumentDb::open(&db_path)?;
        assert_eq!(reopened.get("streams_abc_e1")?.as_deref(), Some("{}"));

        Ok(())
    }
}
