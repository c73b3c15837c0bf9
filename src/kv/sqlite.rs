//! SQLite KV backend
//!
//! Embedded single-file store for one-node deployments and local tooling.
//! Compare-and-swap is a conditional UPDATE guarded by the stored revision.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{KvError, KvStore, Versioned};

/// SQLite implementation of [`KvStore`]
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Arc<Self>, KvError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KvError::Unavailable(format!("failed to create {:?}: {}", parent, e))
            })?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Arc<Self>, KvError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Arc<Self>, KvError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                revision INTEGER NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .map_err(unavailable)?;

        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }
}

fn unavailable(e: rusqlite::Error) -> KvError {
    KvError::Unavailable(format!("sqlite: {}", e))
}

fn current_revision(conn: &Connection, key: &str) -> Result<Option<u64>, KvError> {
    conn.query_row("SELECT revision FROM kv WHERE key = ?1", params![key], |row| {
        row.get::<_, i64>(0)
    })
    .optional()
    .map(|rev| rev.map(|r| r as u64))
    .map_err(unavailable)
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, KvError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT value, revision FROM kv WHERE key = ?1",
            params![key],
            |row| {
                Ok(Versioned {
                    value: row.get(0)?,
                    revision: row.get::<_, i64>(1)? as u64,
                })
            },
        )
        .optional()
        .map_err(unavailable)
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        expected_revision: Option<u64>,
    ) -> Result<u64, KvError> {
        let conn = self.conn.lock().await;

        let (changed, new_revision) = match expected_revision {
            None => {
                let changed = conn
                    .execute(
                        "INSERT INTO kv (key, value, revision) VALUES (?1, ?2, 0)
                         ON CONFLICT(key) DO NOTHING",
                        params![key, value],
                    )
                    .map_err(unavailable)?;
                (changed, 0)
            }
            Some(expected) => {
                let changed = conn
                    .execute(
                        "UPDATE kv SET value = ?1, revision = revision + 1,
                             updated_at = CURRENT_TIMESTAMP
                         WHERE key = ?2 AND revision = ?3",
                        params![value, key, expected as i64],
                    )
                    .map_err(unavailable)?;
                (changed, expected + 1)
            }
        };

        if changed == 1 {
            return Ok(new_revision);
        }

        Err(KvError::RevisionMismatch {
            key: key.to_string(),
            expected: expected_revision,
            actual: current_revision(&conn, key)?,
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(unavailable)?;
        Ok(changed > 0)
    }
}
