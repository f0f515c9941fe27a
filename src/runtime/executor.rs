//! Turn executor
//!
//! Drives one turn through the graph: runs the I/O for the current node,
//! feeds the outcome to the pure transition function, checkpoints the new
//! state, and follows the edge it returns.

use super::locks::ThreadLocks;
use super::traits::Capabilities;
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointRef, CheckpointStore};
use crate::llm::{LlmError, LlmRequest, LlmService, Message, ToolCall};
use crate::state_machine::{
    transition, ConversationState, Event, Next, Node, PendingAuthorization, ResumeSignal,
    ThreadIdentity, TransitionError,
};
use crate::tools::{AuthError, ToolContext};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Engine-level knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum `agent` visits per turn; `None` disables the cap
    pub max_iterations: Option<usize>,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_tokens: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: Some(25),
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            max_tokens: None,
        }
    }
}

/// What starts a turn
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// Fresh turn: the caller's history, ending with the new user message
    Message(ConversationState),
    /// Append `message` to the thread's latest checkpoint, or to `seed` if
    /// the thread has none. A thread parked on authorization has its
    /// outstanding calls abandoned first.
    Continue {
        seed: ConversationState,
        message: Message,
    },
    /// Continue a suspended thread from its latest checkpoint
    Resume(ResumeSignal),
}

/// How a turn ended
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed {
        state: ConversationState,
    },
    Suspended {
        state: ConversationState,
        checkpoint: CheckpointRef,
        pending_message: String,
    },
}

impl TurnOutcome {
    pub fn state(&self) -> &ConversationState {
        match self {
            TurnOutcome::Completed { state } | TurnOutcome::Suspended { state, .. } => state,
        }
    }

    pub fn into_state(self) -> ConversationState {
        match self {
            TurnOutcome::Completed { state } | TurnOutcome::Suspended { state, .. } => state,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, TurnOutcome::Suspended { .. })
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Model invocation failed: {0}")]
    Model(#[from] LlmError),
    #[error("Checkpoint store failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Authorization check failed: {0}")]
    Authorization(#[from] AuthError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Turn exceeded {0} model invocations")]
    IterationLimit(usize),
    #[error("No checkpoint for thread {0}")]
    UnknownThread(String),
    #[error("Thread {thread_id} does not belong to user {user_id}")]
    ThreadOwnership { thread_id: String, user_id: String },
}

/// Runs turns against one model, sharing capabilities, checkpoints and
/// per-thread locks with every other engine.
pub struct TurnEngine {
    llm: Arc<dyn LlmService>,
    capabilities: Arc<dyn Capabilities>,
    checkpoints: Arc<dyn CheckpointStore>,
    locks: Arc<ThreadLocks>,
    config: EngineConfig,
}

impl TurnEngine {
    pub fn new(
        llm: Arc<dyn LlmService>,
        capabilities: Arc<dyn Capabilities>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            llm,
            capabilities,
            checkpoints,
            locks: Arc::new(ThreadLocks::new()),
            config: EngineConfig::default(),
        }
    }

    /// Share locks with engines for other models
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<ThreadLocks>) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model_id(&self) -> &str {
        self.llm.model_id()
    }

    /// Run one turn for `identity`.
    ///
    /// Holds the thread's lock for the whole turn and releases it on return,
    /// including at suspension. The caller's state is never mutated.
    pub async fn run_turn(
        &self,
        identity: &ThreadIdentity,
        input: TurnInput,
    ) -> Result<TurnOutcome, TurnError> {
        let _guard = self.locks.acquire(&identity.thread_id).await;

        match input {
            TurnInput::Message(state) => {
                tracing::info!(
                    thread_id = %identity.thread_id,
                    user_id = %identity.user_id,
                    model = %self.llm.model_id(),
                    messages = state.messages.len(),
                    "Starting turn"
                );
                self.load_owned(identity).await?;
                self.drive(identity, state, Node::Agent, None).await
            }
            TurnInput::Continue { seed, message } => {
                let base = match self.load_owned(identity).await? {
                    Some(checkpoint)
                        if checkpoint.state.is_awaiting_authorization()
                            || !checkpoint.state.outstanding_tool_calls().is_empty() =>
                    {
                        tracing::info!(
                            thread_id = %identity.thread_id,
                            "Abandoning unanswered tool calls for new message"
                        );
                        checkpoint.state.abandon_outstanding()
                    }
                    Some(checkpoint) => checkpoint.state,
                    None => seed,
                };
                self.drive(identity, base.with_message(message), Node::Agent, None)
                    .await
            }
            TurnInput::Resume(signal) => {
                let checkpoint = self
                    .load_owned(identity)
                    .await?
                    .ok_or_else(|| TurnError::UnknownThread(identity.thread_id.clone()))?;

                tracing::info!(
                    thread_id = %identity.thread_id,
                    version = checkpoint.version,
                    "Resuming turn from checkpoint"
                );
                self.drive(
                    identity,
                    checkpoint.state,
                    Node::AuthInterrupt,
                    Some(Event::Resume { signal }),
                )
                .await
            }
        }
    }

    /// Latest checkpoint, rejected if another user owns the thread
    async fn load_owned(
        &self,
        identity: &ThreadIdentity,
    ) -> Result<Option<Checkpoint>, TurnError> {
        let Some(checkpoint) = self.checkpoints.load(&identity.thread_id).await? else {
            return Ok(None);
        };
        if checkpoint.identity.user_id != identity.user_id {
            return Err(TurnError::ThreadOwnership {
                thread_id: identity.thread_id.clone(),
                user_id: identity.user_id.clone(),
            });
        }
        Ok(Some(checkpoint))
    }

    async fn drive(
        &self,
        identity: &ThreadIdentity,
        mut state: ConversationState,
        mut node: Node,
        mut injected: Option<Event>,
    ) -> Result<TurnOutcome, TurnError> {
        let mut model_calls = 0usize;

        loop {
            let event = match injected.take() {
                Some(event) => event,
                None => self.run_node(node, identity, &state, &mut model_calls).await?,
            };
            let event_name = event.name();

            let result = transition(node, &state, event)?;
            let checkpoint = self.checkpoints.save(identity, &result.new_state).await?;

            tracing::debug!(
                thread_id = %identity.thread_id,
                node = %node,
                event = event_name,
                next = ?result.next,
                version = checkpoint.version,
                "Transition"
            );

            state = result.new_state;
            match result.next {
                Next::Goto(next) => node = next,
                Next::Suspend { message } => {
                    tracing::info!(
                        thread_id = %identity.thread_id,
                        version = checkpoint.version,
                        "Turn suspended pending authorization"
                    );
                    return Ok(TurnOutcome::Suspended {
                        state,
                        checkpoint,
                        pending_message: message,
                    });
                }
                Next::Done => {
                    tracing::info!(
                        thread_id = %identity.thread_id,
                        model_calls,
                        "Turn completed"
                    );
                    return Ok(TurnOutcome::Completed { state });
                }
            }
        }
    }

    /// Perform the I/O of `node` and report its outcome as an event
    async fn run_node(
        &self,
        node: Node,
        identity: &ThreadIdentity,
        state: &ConversationState,
        model_calls: &mut usize,
    ) -> Result<Event, TurnError> {
        match node {
            Node::Agent => {
                if let Some(max) = self.config.max_iterations {
                    if *model_calls >= max {
                        tracing::warn!(
                            thread_id = %identity.thread_id,
                            max,
                            "Iteration limit reached"
                        );
                        return Err(TurnError::IterationLimit(max));
                    }
                }
                *model_calls += 1;
                self.call_model(state).await
            }
            Node::CheckAuth => self.check_auth(identity, state).await,
            Node::AuthInterrupt => Ok(Event::GateReached),
            Node::Tools => Ok(Event::ToolsExecuted {
                results: self.execute_tools(identity, state).await,
            }),
            Node::Done => Err(TurnError::Transition(TransitionError::InvalidTransition {
                node,
                event: "run",
            })),
        }
    }

    async fn call_model(&self, state: &ConversationState) -> Result<Event, TurnError> {
        let request = LlmRequest {
            messages: state.messages.clone(),
            tools: self.capabilities.definitions(),
            parallel_tool_calls: self.llm.parallel_tool_calls(),
            max_tokens: self.config.max_tokens,
        };

        let response = tokio::time::timeout(self.config.model_timeout, self.llm.complete(&request))
            .await
            .map_err(|_| LlmError::timed_out(self.config.model_timeout))??;

        let auth_gated = gated_tool_names(&response.message.tool_calls, |name| {
            self.capabilities.requires_auth(name)
        });

        Ok(Event::ModelResponded {
            message: response.message,
            auth_gated,
        })
    }

    async fn check_auth(
        &self,
        identity: &ThreadIdentity,
        state: &ConversationState,
    ) -> Result<Event, TurnError> {
        let calls = state.outstanding_tool_calls();
        let gated = gated_tool_names(&calls, |name| self.capabilities.requires_auth(name));

        let mut pending = Vec::new();
        for tool_name in gated {
            let request = self
                .capabilities
                .authorize(&tool_name, &identity.user_id)
                .await?;
            if !request.is_completed() {
                pending.push(PendingAuthorization::new(
                    request.tool_name,
                    request.authorization_url,
                ));
            }
        }

        tracing::debug!(
            thread_id = %identity.thread_id,
            pending = pending.len(),
            "Authorization checked"
        );
        Ok(Event::AuthChecked { pending })
    }

    /// Run every outstanding call in order; failures become tool results
    async fn execute_tools(
        &self,
        identity: &ThreadIdentity,
        state: &ConversationState,
    ) -> Vec<Message> {
        let mut results = Vec::new();
        for call in state.outstanding_tool_calls() {
            results.push(self.execute_tool(identity, &call).await);
        }
        results
    }

    async fn execute_tool(&self, identity: &ThreadIdentity, call: &ToolCall) -> Message {
        let cancel = CancellationToken::new();
        let ctx = ToolContext::new(
            cancel.clone(),
            identity.user_id.clone(),
            identity.thread_id.clone(),
        );
        let started = Instant::now();

        let outcome = tokio::time::timeout(
            self.config.tool_timeout,
            self.capabilities
                .execute(&call.name, call.arguments.clone(), ctx),
        )
        .await;

        let content = match outcome {
            Ok(Some(output)) if output.success => output.output,
            Ok(Some(output)) => tool_error(&output.output),
            Ok(None) => tool_error(&format!("unknown tool '{}'", call.name)),
            Err(_) => {
                cancel.cancel();
                tool_error(&format!(
                    "tool '{}' timed out after {}s",
                    call.name,
                    self.config.tool_timeout.as_secs_f64()
                ))
            }
        };

        tracing::info!(
            thread_id = %identity.thread_id,
            tool = %call.name,
            duration_ms = %started.elapsed().as_millis(),
            "Tool executed"
        );
        Message::tool_result(call.id.clone(), content)
    }
}

/// Names of gated tools among `calls`, first-encountered order, each once
fn gated_tool_names(calls: &[ToolCall], requires_auth: impl Fn(&str) -> bool) -> Vec<String> {
    let mut seen = HashSet::new();
    calls
        .iter()
        .filter(|c| requires_auth(&c.name))
        .filter(|c| seen.insert(c.name.clone()))
        .map(|c| c.name.clone())
        .collect()
}

/// Tool failure text addressed to the model
fn tool_error(detail: &str) -> String {
    format!("Error: {detail}\nPlease fix your mistakes.")
}
