//! Authorization gate
//!
//! `authorize` is idempotent per (tool, user): while authorization is
//! outstanding every call returns the same pending URL, and once the
//! out-of-band completion signal arrives every later call reports completed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Pending,
    Completed,
}

/// Authorization status of one tool for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub tool_name: String,
    pub status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
}

impl AuthorizationRequest {
    pub fn pending(tool_name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: AuthStatus::Pending,
            authorization_url: url,
        }
    }

    pub fn completed(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: AuthStatus::Completed,
            authorization_url: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AuthStatus::Completed
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid authorization base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Source of authorization status for gated tools
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        tool_name: &str,
        user_id: &str,
    ) -> Result<AuthorizationRequest, AuthError>;
}

// ============================================================================
// In-memory authorizer
// ============================================================================

#[derive(Debug, Clone)]
enum Grant {
    Pending { url: String, state: String },
    Completed,
}

/// Authorizer that issues links under a base URL and learns about
/// completion through [`InMemoryAuthorizer::complete`].
pub struct InMemoryAuthorizer {
    base_url: reqwest::Url,
    grants: Mutex<HashMap<(String, String), Grant>>,
}

impl InMemoryAuthorizer {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| AuthError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        Ok(Self {
            base_url,
            grants: Mutex::new(HashMap::new()),
        })
    }

    /// Record that `user_id` finished authorizing `tool_name`
    pub fn complete(&self, tool_name: &str, user_id: &str) {
        let mut grants = self
            .grants
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        grants.insert((tool_name.to_string(), user_id.to_string()), Grant::Completed);
        tracing::info!(tool = tool_name, user_id, "Authorization completed");
    }

    /// Complete a grant from a visited authorization link. Only the `state`
    /// issued with the pending link is accepted.
    pub fn redeem(&self, tool_name: &str, user_id: &str, state: &str) -> bool {
        let mut grants = self
            .grants
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (tool_name.to_string(), user_id.to_string());
        let valid = match grants.get(&key) {
            Some(Grant::Pending { state: issued, .. }) => issued == state,
            Some(Grant::Completed) => return true,
            None => false,
        };
        if !valid {
            tracing::warn!(tool = tool_name, user_id, "Rejected authorization link");
            return false;
        }
        grants.insert(key, Grant::Completed);
        tracing::info!(tool = tool_name, user_id, "Authorization link redeemed");
        true
    }

    fn issue(&self, tool_name: &str, user_id: &str) -> Grant {
        let state = uuid::Uuid::new_v4().to_string();
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("tool", tool_name)
            .append_pair("user", user_id)
            .append_pair("state", &state);
        Grant::Pending {
            url: url.to_string(),
            state,
        }
    }
}

#[async_trait]
impl Authorizer for InMemoryAuthorizer {
    async fn authorize(
        &self,
        tool_name: &str,
        user_id: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        let mut grants = self
            .grants
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let grant = grants
            .entry((tool_name.to_string(), user_id.to_string()))
            .or_insert_with(|| self.issue(tool_name, user_id));

        Ok(match grant {
            Grant::Pending { url, .. } => {
                AuthorizationRequest::pending(tool_name, Some(url.clone()))
            }
            Grant::Completed => AuthorizationRequest::completed(tool_name),
        })
    }
}
