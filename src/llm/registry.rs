//! Model registry for managing available LLM providers

use super::{all_models, LlmService, LoggingService, ModelDef, Provider};
use std::collections::HashMap;
use std::sync::Arc;

/// Model used when nothing else is configured
pub const FALLBACK_MODEL: &str = "gpt-4o";

/// Configuration for LLM providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub mistral_api_key: Option<String>,
    /// OpenAI-compatible gateway (e.g. `http://localhost:4000/v1`)
    pub openai_base_url: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
}

impl LlmConfig {
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            openai_api_key: var("OPENAI_API_KEY"),
            mistral_api_key: var("MISTRAL_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL"),
            default_model: var("DEFAULT_MODEL"),
        }
    }

    fn api_key_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Mistral => self.mistral_api_key.as_deref(),
        }
    }

    fn base_url_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAI => self.openai_base_url.as_deref(),
            Provider::Mistral => None,
        }
    }
}

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        for model_def in all_models() {
            if let Some(service) = Self::try_create_model(model_def, config) {
                services.insert(model_def.id.to_string(), service);
            }
        }

        let default_model = config
            .default_model
            .clone()
            .or_else(|| {
                if services.contains_key(FALLBACK_MODEL) {
                    Some(FALLBACK_MODEL.to_string())
                } else {
                    let mut ids: Vec<_> = services.keys().cloned().collect();
                    ids.sort();
                    ids.into_iter().next()
                }
            })
            .unwrap_or_else(|| FALLBACK_MODEL.to_string());

        Self {
            services,
            default_model,
        }
    }

    /// Build a registry from ready-made services; the first becomes the default.
    pub fn from_services(services: Vec<Arc<dyn LlmService>>) -> Self {
        let default_model = services
            .first()
            .map_or_else(|| FALLBACK_MODEL.to_string(), |s| s.model_id().to_string());
        Self {
            services: services
                .into_iter()
                .map(|s| (s.model_id().to_string(), s))
                .collect(),
            default_model,
        }
    }

    fn try_create_model(model_def: &ModelDef, config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
        let api_key = config.api_key_for(model_def.provider)?;
        match model_def.build(api_key, config.base_url_for(model_def.provider)) {
            Ok(service) => Some(Arc::new(LoggingService::new(service))),
            Err(e) => {
                tracing::debug!(model = model_def.id, error = %e, "Model unavailable");
                None
            }
        }
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    /// List all available model IDs
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }
}
