//! HTTP transport for the assistant
//!
//! Receives chat-platform events and direct messages, exposes the resume
//! and authorization-completion signals, and lets users pick a model.

mod handlers;
mod types;

pub use handlers::create_router;
pub use types::*;

use crate::orchestrator::Orchestrator;
use crate::tools::InMemoryAuthorizer;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub authorizer: Arc<InMemoryAuthorizer>,
    /// Bearer token callers of `POST /auth/complete` must present
    pub completion_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, authorizer: Arc<InMemoryAuthorizer>) -> Self {
        Self {
            orchestrator,
            authorizer,
            completion_token: None,
        }
    }

    #[must_use]
    pub fn with_completion_token(mut self, token: Option<&str>) -> Self {
        self.completion_token = token.map(Arc::from);
        self
    }
}
