//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::llm::ToolDefinition;
use crate::tools::{AuthError, AuthorizationRequest, CapabilityRegistry, ToolContext, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Tool catalog, authorization policy and execution entry point
#[async_trait]
pub trait Capabilities: Send + Sync {
    fn requires_auth(&self, tool_name: &str) -> bool;

    /// Idempotent per (tool, user)
    async fn authorize(
        &self,
        tool_name: &str,
        user_id: &str,
    ) -> Result<AuthorizationRequest, AuthError>;

    /// `None` if no tool has that name
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput>;

    /// Get tool definitions for LLM
    fn definitions(&self) -> Vec<ToolDefinition>;
}

#[async_trait]
impl<T: Capabilities + ?Sized> Capabilities for Arc<T> {
    fn requires_auth(&self, tool_name: &str) -> bool {
        (**self).requires_auth(tool_name)
    }

    async fn authorize(
        &self,
        tool_name: &str,
        user_id: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        (**self).authorize(tool_name, user_id).await
    }

    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        (**self).execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }
}

// ============================================================================
// Production Adapter
// ============================================================================

#[async_trait]
impl Capabilities for CapabilityRegistry {
    fn requires_auth(&self, tool_name: &str) -> bool {
        CapabilityRegistry::requires_auth(self, tool_name)
    }

    async fn authorize(
        &self,
        tool_name: &str,
        user_id: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        CapabilityRegistry::authorize(self, tool_name, user_id).await
    }

    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        CapabilityRegistry::execute(self, name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        CapabilityRegistry::definitions(self)
    }
}
