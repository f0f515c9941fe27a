//! User preference store
//!
//! One JSON record per user under `<base>/users/<user_id>.json` holding the
//! model the user's turns run on. A missing record is created with the
//! default model on first read.

use crate::llm::{find_model, Provider, FALLBACK_MODEL};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub provider: String,
    pub model: String,
}

impl UserRecord {
    pub fn default_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider: Provider::OpenAI.key().to_string(),
            model: FALLBACK_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupt user record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

#[async_trait]
pub trait UserPreferences: Send + Sync {
    /// Model the user's turns should run on
    async fn get_user_model(&self, user_id: &str) -> Result<String, PreferenceError>;

    /// Store a new model choice; the provider is derived from the catalog
    async fn set_user_model(
        &self,
        user_id: &str,
        model_id: &str,
    ) -> Result<UserRecord, PreferenceError>;
}

fn record_for_model(user_id: &str, model_id: &str) -> Result<UserRecord, PreferenceError> {
    let def =
        find_model(model_id).ok_or_else(|| PreferenceError::UnknownModel(model_id.to_string()))?;
    Ok(UserRecord {
        user_id: user_id.to_string(),
        provider: def.provider.key().to_string(),
        model: def.id.to_string(),
    })
}

// ============================================================================
// File-backed store
// ============================================================================

pub struct FileUserPreferences {
    users_dir: PathBuf,
}

impl FileUserPreferences {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            users_dir: base_dir.as_ref().join("users"),
        }
    }

    fn user_path(&self, user_id: &str) -> Result<PathBuf, PreferenceError> {
        let valid = !user_id.is_empty()
            && user_id != "."
            && user_id != ".."
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(PreferenceError::InvalidUserId(user_id.to_string()));
        }
        Ok(self.users_dir.join(format!("{user_id}.json")))
    }

    async fn write(&self, path: &Path, record: &UserRecord) -> Result<(), PreferenceError> {
        let io_err = |source| PreferenceError::Io {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(&self.users_dir)
            .await
            .map_err(io_err)?;
        let json = serde_json::to_string_pretty(record).map_err(|source| PreferenceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        tokio::fs::write(path, json).await.map_err(io_err)
    }

    pub async fn get_record(&self, user_id: &str) -> Result<UserRecord, PreferenceError> {
        let path = self.user_path(user_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|source| PreferenceError::Corrupt { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let record = UserRecord::default_for(user_id);
                self.write(&path, &record).await?;
                tracing::info!(user_id, model = %record.model, "Created default user record");
                Ok(record)
            }
            Err(source) => Err(PreferenceError::Io { path, source }),
        }
    }
}

#[async_trait]
impl UserPreferences for FileUserPreferences {
    async fn get_user_model(&self, user_id: &str) -> Result<String, PreferenceError> {
        Ok(self.get_record(user_id).await?.model)
    }

    async fn set_user_model(
        &self,
        user_id: &str,
        model_id: &str,
    ) -> Result<UserRecord, PreferenceError> {
        let path = self.user_path(user_id)?;
        let record = record_for_model(user_id, model_id)?;
        self.write(&path, &record).await?;
        tracing::info!(user_id, model = model_id, "Updated user model");
        Ok(record)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct InMemoryUserPreferences {
    records: Mutex<HashMap<String, UserRecord>>,
}

impl InMemoryUserPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserPreferences for InMemoryUserPreferences {
    async fn get_user_model(&self, user_id: &str) -> Result<String, PreferenceError> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(records
            .entry(user_id.to_string())
            .or_insert_with(|| UserRecord::default_for(user_id))
            .model
            .clone())
    }

    async fn set_user_model(
        &self,
        user_id: &str,
        model_id: &str,
    ) -> Result<UserRecord, PreferenceError> {
        let record = record_for_model(user_id, model_id)?;
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(user_id.to_string(), record.clone());
        Ok(record)
    }
}
