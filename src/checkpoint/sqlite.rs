//! SQLite-backed checkpoint store
//!
//! Keeps every version of every thread; `load` reads the highest.

use super::{Checkpoint, CheckpointError, CheckpointRef, CheckpointResult, CheckpointStore};
use crate::state_machine::{ConversationState, ThreadIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (thread_id, version)
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_user ON checkpoints(user_id);
";

/// Thread-safe checkpoint database handle
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> CheckpointResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> CheckpointResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CheckpointResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of stored versions for a thread
    pub fn version_count(&self, thread_id: &str) -> CheckpointResult<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        identity: &ThreadIdentity,
        state: &ConversationState,
    ) -> CheckpointResult<CheckpointRef> {
        let state_json = serde_json::to_string(state)?;
        let now = Utc::now();

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM checkpoints WHERE thread_id = ?1",
            params![identity.thread_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO checkpoints (thread_id, version, user_id, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.thread_id,
                version,
                identity.user_id,
                state_json,
                now.to_rfc3339()
            ],
        )?;
        tx.commit()?;

        Ok(CheckpointRef {
            thread_id: identity.thread_id.clone(),
            version: u64::try_from(version).unwrap_or(0),
        })
    }

    async fn load(&self, thread_id: &str) -> CheckpointResult<Option<Checkpoint>> {
        let row = self
            .conn()
            .query_row(
                "SELECT version, user_id, state, created_at FROM checkpoints
                 WHERE thread_id = ?1 ORDER BY version DESC LIMIT 1",
                params![thread_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((version, user_id, state_json, created_at)) = row else {
            return Ok(None);
        };

        let state: ConversationState =
            serde_json::from_str(&state_json).map_err(|source| CheckpointError::Corrupt {
                thread_id: thread_id.to_string(),
                source,
            })?;

        Ok(Some(Checkpoint {
            identity: ThreadIdentity::new(user_id, thread_id),
            version: u64::try_from(version).unwrap_or(0),
            state,
            created_at: parse_datetime(&created_at),
        }))
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
