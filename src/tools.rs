//! Capability registry
//!
//! Holds the tools the model may call, which of them are gated behind user
//! authorization, and the entry point for executing them.

pub mod auth;
mod think;
mod web;

pub use auth::{AuthError, AuthStatus, AuthorizationRequest, Authorizer, InMemoryAuthorizer};
pub use think::ThinkTool;
pub use web::ScrapeWebsiteTool;

use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// All context needed for a tool invocation.
///
/// Created fresh for each call; tools are stateless.
#[derive(Clone)]
pub struct ToolContext {
    /// Cancelled when the call times out
    pub cancel: CancellationToken,
    pub user_id: String,
    pub thread_id: String,
}

impl ToolContext {
    pub fn new(
        cancel: CancellationToken,
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            cancel,
            user_id: user_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// Trait for tools that can be executed by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Whether the tool needs out-of-band user authorization first
    fn requires_auth(&self) -> bool {
        false
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// Collection of tools plus the authorization policy covering them.
///
/// Read-mostly and shared across every turn.
pub struct CapabilityRegistry {
    tools: Vec<Arc<dyn Tool>>,
    authorizer: Arc<dyn Authorizer>,
}

impl CapabilityRegistry {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            tools: Vec::new(),
            authorizer,
        }
    }

    /// Registry with the built-in tools
    pub fn standard(authorizer: Arc<dyn Authorizer>) -> Self {
        Self::new(authorizer)
            .with_tool(Arc::new(ThinkTool))
            .with_tool(Arc::new(ScrapeWebsiteTool::default()))
    }

    /// Add a tool; lookups resolve to the first tool registered under a name
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Unknown tools are not gated; executing them fails as a tool error
    pub fn requires_auth(&self, name: &str) -> bool {
        self.find(name).is_some_and(|t| t.requires_auth())
    }

    pub async fn authorize(
        &self,
        name: &str,
        user_id: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        self.authorizer.authorize(name, user_id).await
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name with context
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        match self.find(name) {
            Some(tool) => Some(tool.run(input, ctx).await),
            None => None,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}
