use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::CheckpointStore;
use colloquy_core::types::{Checkpoint, ThreadId};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
        thread_id TEXT PRIMARY KEY,
        cursor TEXT NOT NULL,
        checkpoint TEXT NOT NULL,
        created_at TEXT NOT NULL
    );";

/// SQLite-backed checkpoint store. One row per thread holds its latest snapshot.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> ColloquyError {
    ColloquyError::Checkpoint(e.to_string())
}

impl SqliteCheckpointStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| db_err(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Checkpoint store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let json = serde_json::to_string(checkpoint)?;
            let conn = self.conn.lock().map_err(db_err)?;
            conn.execute(
                "INSERT OR REPLACE INTO checkpoints (thread_id, cursor, checkpoint, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    checkpoint.thread_id.as_str(),
                    checkpoint.cursor.to_string(),
                    json,
                    checkpoint.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            debug!(thread_id = %checkpoint.thread_id, cursor = %checkpoint.cursor, "Checkpoint saved");
            Ok(())
        })
    }

    fn load<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, Result<Option<Checkpoint>>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let json: Option<String> = conn
                .query_row(
                    "SELECT checkpoint FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            match json {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
    }

    fn delete<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let removed = conn
                .execute(
                    "DELETE FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id.as_str()],
                )
                .map_err(db_err)?;
            Ok(removed)
        })
    }
}
