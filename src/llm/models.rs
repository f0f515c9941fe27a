//! Centralized model definitions
//!
//! Every model the assistant can run on is listed here once, together with
//! the provider that serves it and whether it may emit parallel tool calls.

use super::openai::{Endpoint, OpenAIService};
use super::LlmService;
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    Mistral,
}

impl Provider {
    /// Get the display name for this provider
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Mistral => "Mistral",
        }
    }

    /// Lowercase key stored in user preference records
    pub fn key(self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Mistral => "mistral",
        }
    }

    fn endpoint(self) -> Endpoint {
        match self {
            Provider::OpenAI => Endpoint::OpenAI,
            Provider::Mistral => Endpoint::Mistral,
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gpt-4o")
    pub id: &'static str,
    pub provider: Provider,
    /// API name used by the provider
    pub api_name: &'static str,
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Whether the model may return several tool calls in one response
    pub parallel_tool_calling: bool,
}

impl ModelDef {
    /// Create the service for this model
    pub fn build(
        &self,
        api_key: &str,
        base_url: Option<&str>,
    ) -> Result<Arc<dyn LlmService>, String> {
        if api_key.is_empty() {
            return Err(format!(
                "{} requires an API key for {}",
                self.id,
                self.provider.display_name()
            ));
        }
        let service = OpenAIService::new(
            api_key.to_string(),
            self.id,
            self.api_name,
            self.provider.endpoint(),
            base_url,
            self.parallel_tool_calling,
        )
        .map_err(|e| e.to_string())?;
        Ok(Arc::new(service))
    }
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gpt-4o",
            provider: Provider::OpenAI,
            api_name: "gpt-4o",
            description: "GPT-4o (balanced, default)",
            context_window: 128_000,
            parallel_tool_calling: true,
        },
        ModelDef {
            id: "gpt-4o-mini",
            provider: Provider::OpenAI,
            api_name: "gpt-4o-mini",
            description: "GPT-4o Mini (fast, efficient)",
            context_window: 128_000,
            parallel_tool_calling: true,
        },
        ModelDef {
            id: "o3-mini",
            provider: Provider::OpenAI,
            api_name: "o3-mini",
            description: "o3-mini (reasoning, sequential tool use)",
            context_window: 200_000,
            parallel_tool_calling: false,
        },
        ModelDef {
            id: "mistral-large-latest",
            provider: Provider::Mistral,
            api_name: "mistral-large-latest",
            description: "Mistral Large",
            context_window: 128_000,
            parallel_tool_calling: true,
        },
        ModelDef {
            id: "mistral-small-latest",
            provider: Provider::Mistral,
            api_name: "mistral-small-latest",
            description: "Mistral Small",
            context_window: 32_000,
            parallel_tool_calling: true,
        },
        ModelDef {
            id: "mistral-nemo",
            provider: Provider::Mistral,
            api_name: "open-mistral-nemo",
            description: "Mistral NeMo",
            context_window: 128_000,
            parallel_tool_calling: true,
        },
    ]
}

/// Look up a model definition by its user-facing ID
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    all_models().iter().find(|m| m.id == id)
}
