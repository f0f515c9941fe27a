//! Conversation orchestrator
//!
//! Sits between the transport and the engine: resolves thread identity,
//! picks the user's model, seeds fresh threads with the system prompt and
//! turns engine outcomes into replies. Errors never reach the user; they
//! are logged and replaced with a generic apology.

use crate::checkpoint::CheckpointStore;
use crate::dedup::EventDedupGuard;
use crate::llm::{Message, ModelRegistry, Role};
use crate::preferences::UserPreferences;
use crate::runtime::{
    Capabilities, EngineConfig, ThreadLocks, TurnEngine, TurnError, TurnInput, TurnOutcome,
};
use crate::state_machine::{ConversationState, ResumeSignal, ThreadIdentity};
use crate::system_prompt::build_system_prompt;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const GENERIC_ERROR_MESSAGE: &str =
    "An unexpected error occurred while processing your request.";

pub const MENTION_WITHOUT_TEXT: &str = "Hi there! You didn't provide a message with your mention.\n\
Mention me again in this thread so that I can help you out!";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error("No models configured")]
    NoModels,
}

// ============================================================================
// Agent registry
// ============================================================================

/// One engine per model, built on first use and shared afterwards.
///
/// Every engine shares the same capabilities, checkpoint store and thread
/// locks, so switching a user's model mid-thread still serializes turns.
pub struct AgentRegistry {
    models: ModelRegistry,
    capabilities: Arc<dyn Capabilities>,
    checkpoints: Arc<dyn CheckpointStore>,
    locks: Arc<ThreadLocks>,
    config: EngineConfig,
    engines: Mutex<HashMap<String, Arc<TurnEngine>>>,
}

impl AgentRegistry {
    pub fn new(
        models: ModelRegistry,
        capabilities: Arc<dyn Capabilities>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            models,
            capabilities,
            checkpoints,
            locks: Arc::new(ThreadLocks::new()),
            config,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Engine for `model_id`, falling back to the default model when the
    /// requested one is not available.
    pub fn engine_for(&self, model_id: &str) -> Option<Arc<TurnEngine>> {
        let llm = match self.models.get(model_id) {
            Some(llm) => llm,
            None => {
                tracing::warn!(
                    model = model_id,
                    fallback = self.models.default_model_id(),
                    "Requested model unavailable, using default"
                );
                self.models.default()?
            }
        };

        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        let engine = engines
            .entry(llm.model_id().to_string())
            .or_insert_with(|| {
                tracing::debug!(model = %llm.model_id(), "Building engine");
                Arc::new(
                    TurnEngine::new(
                        llm.clone(),
                        self.capabilities.clone(),
                        self.checkpoints.clone(),
                    )
                    .with_locks(self.locks.clone())
                    .with_config(self.config.clone()),
                )
            });
        Some(engine.clone())
    }

    pub fn cached_engines(&self) -> usize {
        self.engines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }
}

// ============================================================================
// Requests and replies
// ============================================================================

/// Prior thread message supplied by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub user_id: String,
    /// Existing thread to continue; a new one is created when absent
    pub thread_id: Option<String>,
    pub text: String,
    /// When present the turn starts fresh from this history instead of the
    /// thread's checkpoint
    pub history: Option<Vec<HistoryMessage>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    pub thread_id: String,
    pub message: String,
    pub suspended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_auth_message: Option<String>,
}

impl TurnReply {
    fn from_outcome(identity: &ThreadIdentity, outcome: TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Completed { state } => Self {
                thread_id: identity.thread_id.clone(),
                message: state.final_reply().unwrap_or_default().to_string(),
                suspended: false,
                pending_auth_message: None,
            },
            TurnOutcome::Suspended {
                pending_message, ..
            } => Self {
                thread_id: identity.thread_id.clone(),
                message: pending_message.clone(),
                suspended: true,
                pending_auth_message: Some(pending_message),
            },
        }
    }

    fn text(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            message: message.into(),
            suspended: false,
            pending_auth_message: None,
        }
    }
}

/// Chat-platform event after the transport has unwrapped its envelope
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    pub event_type: String,
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub text: Option<String>,
    pub thread_id: Option<String>,
    pub bot_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDisposition {
    Duplicate,
    Ignored,
    Replied(TurnReply),
}

/// Remove leading `<@U123>` mention tokens
pub fn strip_mentions(text: &str) -> &str {
    let mut rest = text.trim_start();
    while let Some((_, after)) = rest
        .strip_prefix("<@")
        .and_then(|tail| tail.split_once('>'))
    {
        rest = after.trim_start();
    }
    rest.trim_end()
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    agents: AgentRegistry,
    preferences: Arc<dyn UserPreferences>,
    dedup: EventDedupGuard,
}

impl Orchestrator {
    pub fn new(agents: AgentRegistry, preferences: Arc<dyn UserPreferences>) -> Self {
        Self {
            agents,
            preferences,
            dedup: EventDedupGuard::default(),
        }
    }

    #[must_use]
    pub fn with_dedup(mut self, dedup: EventDedupGuard) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn preferences(&self) -> &Arc<dyn UserPreferences> {
        &self.preferences
    }

    /// Run a turn for a new user message
    pub async fn handle_message(&self, msg: IncomingMessage) -> TurnReply {
        let identity = match msg.thread_id {
            Some(thread_id) => ThreadIdentity::new(&msg.user_id, thread_id),
            None => ThreadIdentity::generate(&msg.user_id),
        };

        let input = match msg.history {
            Some(history) => {
                let mut messages = vec![Message::system(build_system_prompt(Utc::now()))];
                messages.extend(history.into_iter().filter_map(history_message));
                messages.push(Message::user(msg.text));
                TurnInput::Message(ConversationState::new(messages))
            }
            None => TurnInput::Continue {
                seed: ConversationState::new(vec![Message::system(build_system_prompt(
                    Utc::now(),
                ))]),
                message: Message::user(msg.text),
            },
        };

        self.run(&identity, input).await
    }

    /// Continue a thread suspended for authorization
    pub async fn resume(&self, user_id: &str, thread_id: &str) -> TurnReply {
        let identity = ThreadIdentity::new(user_id, thread_id);
        self.run(&identity, TurnInput::Resume(ResumeSignal::post_auth()))
            .await
    }

    /// Dedup, filter and dispatch a platform event
    pub async fn handle_event(&self, event: InboundEvent) -> EventDisposition {
        if self
            .dedup
            .is_duplicate(&event.event_type, event.event_id.as_deref())
        {
            tracing::info!(
                event_id = event.event_id.as_deref().unwrap_or_default(),
                event_type = %event.event_type,
                "Duplicate event skipped"
            );
            return EventDisposition::Duplicate;
        }

        if event.bot_id.is_some() {
            return EventDisposition::Ignored;
        }
        let (Some(user_id), Some(raw)) = (event.user_id, event.text) else {
            return EventDisposition::Ignored;
        };

        let text = strip_mentions(&raw);
        if text.is_empty() {
            if event.event_type == "app_mention" {
                let thread_id = event
                    .thread_id
                    .unwrap_or_else(|| ThreadIdentity::generate(&user_id).thread_id);
                return EventDisposition::Replied(TurnReply::text(thread_id, MENTION_WITHOUT_TEXT));
            }
            return EventDisposition::Ignored;
        }

        let reply = self
            .handle_message(IncomingMessage {
                user_id,
                thread_id: event.thread_id,
                text: text.to_string(),
                history: None,
            })
            .await;
        EventDisposition::Replied(reply)
    }

    async fn run(&self, identity: &ThreadIdentity, input: TurnInput) -> TurnReply {
        match self.try_run(identity, input).await {
            Ok(outcome) => TurnReply::from_outcome(identity, outcome),
            Err(e) => {
                tracing::error!(
                    thread_id = %identity.thread_id,
                    user_id = %identity.user_id,
                    error = %e,
                    "Turn failed"
                );
                TurnReply::text(identity.thread_id.clone(), GENERIC_ERROR_MESSAGE)
            }
        }
    }

    async fn try_run(
        &self,
        identity: &ThreadIdentity,
        input: TurnInput,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let model = match self.preferences.get_user_model(&identity.user_id).await {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(user_id = %identity.user_id, error = %e, "Preference lookup failed");
                self.agents.models().default_model_id().to_string()
            }
        };
        let engine = self
            .agents
            .engine_for(&model)
            .ok_or(OrchestratorError::NoModels)?;
        Ok(engine.run_turn(identity, input).await?)
    }
}

fn history_message(entry: HistoryMessage) -> Option<Message> {
    match entry.role {
        Role::User => Some(Message::user(entry.content)),
        Role::Assistant => Some(Message::assistant(entry.content)),
        // Tool traffic and foreign system prompts are not replayed
        Role::System | Role::Tool => None,
    }
}
