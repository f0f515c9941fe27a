//! Checkpoint store
//!
//! Every engine transition writes a new immutable snapshot of the thread's
//! state; `load` always returns the most recent one.

mod sqlite;

pub use sqlite::SqliteCheckpointStore;

use crate::state_machine::{ConversationState, ThreadIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt checkpoint for thread {thread_id}: {source}")]
    Corrupt {
        thread_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Points at one written snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub thread_id: String,
    pub version: u64,
}

/// Immutable snapshot of a thread, versioned by write order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub identity: ThreadIdentity,
    pub version: u64,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn reference(&self) -> CheckpointRef {
        CheckpointRef {
            thread_id: self.identity.thread_id.clone(),
            version: self.version,
        }
    }
}

/// Durable per-thread state.
///
/// Read-your-writes for a single thread under sequential access.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(
        &self,
        identity: &ThreadIdentity,
        state: &ConversationState,
    ) -> CheckpointResult<CheckpointRef>;

    /// Latest snapshot, or `None` if the thread was never saved
    async fn load(&self, thread_id: &str) -> CheckpointResult<Option<Checkpoint>>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn save(
        &self,
        identity: &ThreadIdentity,
        state: &ConversationState,
    ) -> CheckpointResult<CheckpointRef> {
        (**self).save(identity, state).await
    }

    async fn load(&self, thread_id: &str) -> CheckpointResult<Option<Checkpoint>> {
        (**self).load(thread_id).await
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps only the latest snapshot per thread
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        identity: &ThreadIdentity,
        state: &ConversationState,
    ) -> CheckpointResult<CheckpointRef> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let version = checkpoints
            .get(&identity.thread_id)
            .map_or(1, |c| c.version + 1);
        let checkpoint = Checkpoint {
            identity: identity.clone(),
            version,
            state: state.clone(),
            created_at: Utc::now(),
        };
        let reference = checkpoint.reference();
        checkpoints.insert(identity.thread_id.clone(), checkpoint);
        Ok(reference)
    }

    async fn load(&self, thread_id: &str) -> CheckpointResult<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(thread_id)
            .cloned())
    }
}
