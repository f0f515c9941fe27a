//! Mock implementations for testing
//!
//! These mocks enable exercising the engine end to end without real I/O.

use super::traits::*;
use crate::checkpoint::{
    Checkpoint, CheckpointError, CheckpointRef, CheckpointResult, CheckpointStore,
};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, ToolDefinition};
use crate::state_machine::{ConversationState, ThreadIdentity};
use crate::tools::{AuthError, AuthorizationRequest, ToolContext, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    parallel_tool_calls: bool,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            parallel_tool_calls: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self) -> Result<LlmResponse, LlmError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next_response()
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn parallel_tool_calls(&self) -> bool {
        self.parallel_tool_calls
    }
}

// ============================================================================
// Delayed Mock LLM Client (for serialization testing)
// ============================================================================

/// Mock LLM client with configurable delay
pub struct DelayedMockLlmClient {
    inner: MockLlmClient,
    delay: Duration,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockLlmClient {
    pub fn new(model_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockLlmClient::new(model_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.inner.queue_response(response);
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.inner.recorded_requests()
    }
}

#[async_trait]
impl LlmService for DelayedMockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_waiters();
        tokio::time::sleep(self.delay).await;
        self.inner.next_response()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Mock Capabilities
// ============================================================================

struct MockTool {
    gated: bool,
    auth_url: Option<String>,
    output: ToolOutput,
    delay: Option<Duration>,
}

/// Tool catalog with canned outputs and a scriptable authorization state
#[derive(Default)]
pub struct MockCapabilities {
    tools: HashMap<String, MockTool>,
    order: Vec<String>,
    completed: Mutex<HashSet<(String, String)>>,
    authorizer_down: bool,
    /// Record of tool executions
    pub executions: Mutex<Vec<(String, Value)>>,
    /// Record of (tool, user) authorization checks
    pub auth_checks: Mutex<Vec<(String, String)>>,
}

impl MockCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(mut self, name: &str, tool: MockTool) -> Self {
        self.order.push(name.to_string());
        self.tools.insert(name.to_string(), tool);
        self
    }

    /// Add an ungated tool with a predefined output
    #[must_use]
    pub fn with_tool(self, name: &str, output: ToolOutput) -> Self {
        self.insert(
            name,
            MockTool {
                gated: false,
                auth_url: None,
                output,
                delay: None,
            },
        )
    }

    /// Add a tool that needs authorization at `url`
    #[must_use]
    pub fn with_gated_tool(self, name: &str, url: &str, output: ToolOutput) -> Self {
        self.insert(
            name,
            MockTool {
                gated: true,
                auth_url: Some(url.to_string()),
                output,
                delay: None,
            },
        )
    }

    /// Add an ungated tool that takes `delay` to finish
    #[must_use]
    pub fn with_slow_tool(self, name: &str, delay: Duration, output: ToolOutput) -> Self {
        self.insert(
            name,
            MockTool {
                gated: false,
                auth_url: None,
                output,
                delay: Some(delay),
            },
        )
    }

    /// Make every authorization check fail as if the provider were down
    #[must_use]
    pub fn with_failing_authorizer(mut self) -> Self {
        self.authorizer_down = true;
        self
    }

    /// Deliver the out-of-band completion signal
    pub fn complete_auth(&self, tool: &str, user_id: &str) {
        self.completed
            .lock()
            .unwrap()
            .insert((tool.to_string(), user_id.to_string()));
    }

    pub fn recorded_executions(&self) -> Vec<(String, Value)> {
        self.executions.lock().unwrap().clone()
    }

    pub fn recorded_auth_checks(&self) -> Vec<(String, String)> {
        self.auth_checks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Capabilities for MockCapabilities {
    fn requires_auth(&self, tool_name: &str) -> bool {
        self.tools.get(tool_name).is_some_and(|t| t.gated)
    }

    async fn authorize(
        &self,
        tool_name: &str,
        user_id: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        self.auth_checks
            .lock()
            .unwrap()
            .push((tool_name.to_string(), user_id.to_string()));

        if self.authorizer_down {
            return Err(AuthError::Unavailable("connection refused".to_string()));
        }
        let key = (tool_name.to_string(), user_id.to_string());
        if self.completed.lock().unwrap().contains(&key) {
            return Ok(AuthorizationRequest::completed(tool_name));
        }
        let url = self.tools.get(tool_name).and_then(|t| t.auth_url.clone());
        Ok(AuthorizationRequest::pending(tool_name, url))
    }

    async fn execute(&self, name: &str, input: Value, _ctx: ToolContext) -> Option<ToolOutput> {
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input));
        let tool = self.tools.get(name)?;
        if let Some(delay) = tool.delay {
            tokio::time::sleep(delay).await;
        }
        Some(tool.output.clone())
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("Mock {name}"),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            })
            .collect()
    }
}

// ============================================================================
// Failing Checkpoint Store
// ============================================================================

/// Store whose writes always fail
#[derive(Default)]
pub struct FailingCheckpointStore;

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn save(
        &self,
        _identity: &ThreadIdentity,
        _state: &ConversationState,
    ) -> CheckpointResult<CheckpointRef> {
        Err(CheckpointError::Unavailable("disk full".to_string()))
    }

    async fn load(&self, _thread_id: &str) -> CheckpointResult<Option<Checkpoint>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::llm::{Message, Role, ToolCall};
    use crate::runtime::{EngineConfig, TurnEngine, TurnError, TurnInput, TurnOutcome};
    use crate::state_machine::ResumeSignal;
    use serde_json::json;

    const AUTH_URL: &str = "https://auth.example/x";

    fn identity() -> ThreadIdentity {
        ThreadIdentity::new("U1", "T1")
    }

    fn fresh(text: &str) -> ConversationState {
        ConversationState::new(vec![Message::system("You are Archer."), Message::user(text)])
    }

    fn reply(text: &str) -> LlmResponse {
        LlmResponse::new(Message::assistant(text))
    }

    fn calls(calls: &[(&str, &str)]) -> LlmResponse {
        LlmResponse::new(Message::assistant_with_tools(
            "",
            calls
                .iter()
                .map(|(id, name)| ToolCall::new(*id, *name, json!({"q": "x"})))
                .collect(),
        ))
    }

    fn github_caps() -> Arc<MockCapabilities> {
        Arc::new(
            MockCapabilities::new()
                .with_tool("search", ToolOutput::success("3 results"))
                .with_gated_tool("github", AUTH_URL, ToolOutput::success("2 open PRs")),
        )
    }

    fn engine(
        llm: Arc<dyn LlmService>,
        caps: Arc<MockCapabilities>,
        store: Arc<dyn CheckpointStore>,
    ) -> TurnEngine {
        TurnEngine::new(llm, caps, store)
    }

    // ========================================================================
    // Mock sanity
    // ========================================================================

    #[tokio::test]
    async fn test_mock_llm_client() {
        let client = MockLlmClient::new("mock");
        client.queue_response(reply("hi"));
        let request = LlmRequest {
            messages: vec![Message::user("hello")],
            tools: vec![],
            parallel_tool_calls: true,
            max_tokens: None,
        };
        assert_eq!(client.complete(&request).await.unwrap().message.content, "hi");
        assert!(client.complete(&request).await.is_err());
        assert_eq!(client.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_capabilities_auth_flow() {
        let caps = github_caps();
        assert!(caps.requires_auth("github"));
        assert!(!caps.requires_auth("search"));
        assert!(!caps.authorize("github", "U1").await.unwrap().is_completed());
        caps.complete_auth("github", "U1");
        assert!(caps.authorize("github", "U1").await.unwrap().is_completed());
    }

    // ========================================================================
    // Completion paths
    // ========================================================================

    #[tokio::test]
    async fn test_plain_reply_completes_without_tools() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(reply("Hello! How can I help?"));
        let caps = Arc::new(MockCapabilities::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(llm.clone(), caps.clone(), store.clone());

        let input = fresh("hello");
        let outcome = engine
            .run_turn(&identity(), TurnInput::Message(input.clone()))
            .await
            .unwrap();

        assert!(!outcome.is_suspended());
        assert_eq!(outcome.state().final_reply(), Some("Hello! How can I help?"));
        assert_eq!(outcome.state().messages.len(), input.messages.len() + 1);
        assert!(llm.recorded_requests()[0].tools.is_empty());
        assert!(caps.recorded_auth_checks().is_empty());

        let saved = store.load("T1").await.unwrap().unwrap();
        assert_eq!(&saved.state, outcome.state());
    }

    #[tokio::test]
    async fn test_ungated_tools_skip_authorization() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "search")]));
        llm.queue_response(reply("Found 3 results."));
        let caps = github_caps();
        let engine = engine(llm.clone(), caps.clone(), Arc::new(InMemoryCheckpointStore::new()));

        let outcome = engine
            .run_turn(&identity(), TurnInput::Message(fresh("search for x")))
            .await
            .unwrap();

        assert!(!outcome.is_suspended());
        assert!(caps.recorded_auth_checks().is_empty());
        assert_eq!(caps.recorded_executions().len(), 1);

        let second = &llm.recorded_requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "3 results");
        assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_parallel_flag_reaches_model() {
        let llm = Arc::new(MockLlmClient::new("mock").with_parallel_tool_calls(false));
        llm.queue_response(reply("ok"));
        let engine = engine(
            llm.clone(),
            github_caps(),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        engine
            .run_turn(&identity(), TurnInput::Message(fresh("hi")))
            .await
            .unwrap();

        let request = &llm.recorded_requests()[0];
        assert!(!request.parallel_tool_calls);
        assert_eq!(request.tools.len(), 2);
    }

    // ========================================================================
    // Suspension and resume
    // ========================================================================

    #[tokio::test]
    async fn test_gated_tool_suspends_with_url() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        let caps = github_caps();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(llm.clone(), caps.clone(), store.clone());

        let outcome = engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap();

        let TurnOutcome::Suspended {
            state,
            checkpoint,
            pending_message,
        } = outcome
        else {
            panic!("expected suspension");
        };
        assert!(pending_message.contains(AUTH_URL));
        assert!(pending_message.contains("github"));
        assert_eq!(checkpoint.thread_id, "T1");
        assert!(caps.recorded_executions().is_empty());

        let saved = store.load("T1").await.unwrap().unwrap();
        assert_eq!(saved.version, checkpoint.version);
        assert_eq!(saved.state, state);
        assert_eq!(saved.state.pending_auth_message.as_deref(), Some(pending_message.as_str()));
    }

    #[tokio::test]
    async fn test_pending_message_is_deterministic() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        llm.queue_response(calls(&[("c9", "github")]));
        let engine = engine(llm, github_caps(), Arc::new(InMemoryCheckpointStore::new()));

        let first = engine
            .run_turn(
                &ThreadIdentity::new("U1", "T1"),
                TurnInput::Message(fresh("list my PRs")),
            )
            .await
            .unwrap();
        let second = engine
            .run_turn(
                &ThreadIdentity::new("U1", "T2"),
                TurnInput::Message(fresh("list my PRs again")),
            )
            .await
            .unwrap();

        assert_eq!(
            first.state().pending_auth_message,
            second.state().pending_auth_message
        );
    }

    #[tokio::test]
    async fn test_only_unauthorized_tools_are_listed() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github"), ("c2", "calendar")]));
        let caps = Arc::new(
            MockCapabilities::new()
                .with_gated_tool("github", AUTH_URL, ToolOutput::success("prs"))
                .with_gated_tool(
                    "calendar",
                    "https://auth.example/cal",
                    ToolOutput::success("events"),
                ),
        );
        caps.complete_auth("github", "U1");
        let engine = engine(llm, caps.clone(), Arc::new(InMemoryCheckpointStore::new()));

        let outcome = engine
            .run_turn(&identity(), TurnInput::Message(fresh("plan my day")))
            .await
            .unwrap();

        let pending = outcome.state().pending_auth_message.clone().unwrap();
        assert!(pending.contains("calendar"));
        assert!(!pending.contains(AUTH_URL));
        assert_eq!(caps.recorded_auth_checks().len(), 2);
    }

    #[tokio::test]
    async fn test_already_authorized_runs_tools_directly() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        llm.queue_response(reply("You have 2 open PRs."));
        let caps = github_caps();
        caps.complete_auth("github", "U1");
        let engine = engine(llm, caps.clone(), Arc::new(InMemoryCheckpointStore::new()));

        let outcome = engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap();

        assert!(!outcome.is_suspended());
        assert!(outcome.state().pending_auth_message.is_none());
        assert_eq!(caps.recorded_executions().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_executes_tool_and_completes() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        llm.queue_response(reply("You have 2 open PRs."));
        let caps = github_caps();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(llm.clone(), caps.clone(), store.clone());

        let suspended = engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap();
        assert!(suspended.is_suspended());

        caps.complete_auth("github", "U1");
        let outcome = engine
            .run_turn(&identity(), TurnInput::Resume(ResumeSignal::post_auth()))
            .await
            .unwrap();

        assert!(!outcome.is_suspended());
        let state = outcome.state();
        assert!(state.pending_auth_message.is_none());
        assert!(state.resume_signal.is_none());
        assert_eq!(state.final_reply(), Some("You have 2 open PRs."));
        assert!(state
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content == "2 open PRs"));
        assert_eq!(caps.recorded_executions().len(), 1);
        assert_eq!(llm.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_uses_checkpoint_not_caller_history() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        llm.queue_response(reply("done"));
        let caps = github_caps();
        let engine = engine(llm.clone(), caps, Arc::new(InMemoryCheckpointStore::new()));

        engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap();
        engine
            .run_turn(&identity(), TurnInput::Resume(ResumeSignal::post_auth()))
            .await
            .unwrap();

        let resumed_request = &llm.recorded_requests()[1];
        assert_eq!(resumed_request.messages[1].content, "list my PRs");
    }

    #[tokio::test]
    async fn test_resume_without_pending_is_noop() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(reply("Hello"));
        let caps = github_caps();
        let engine = engine(llm.clone(), caps.clone(), Arc::new(InMemoryCheckpointStore::new()));

        let first = engine
            .run_turn(&identity(), TurnInput::Message(fresh("hi")))
            .await
            .unwrap();
        let resumed = engine
            .run_turn(&identity(), TurnInput::Resume(ResumeSignal::post_auth()))
            .await
            .unwrap();

        assert!(!resumed.is_suspended());
        assert_eq!(resumed.state().messages, first.state().messages);
        assert_eq!(llm.recorded_requests().len(), 1);
        assert!(caps.recorded_executions().is_empty());
    }

    #[tokio::test]
    async fn test_resume_unknown_thread() {
        let engine = engine(
            Arc::new(MockLlmClient::new("mock")),
            github_caps(),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let err = engine
            .run_turn(&identity(), TurnInput::Resume(ResumeSignal::post_auth()))
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::UnknownThread(t) if t == "T1"));
    }

    #[tokio::test]
    async fn test_resume_by_other_user_rejected() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        let caps = github_caps();
        let engine = engine(llm, caps.clone(), Arc::new(InMemoryCheckpointStore::new()));

        engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap();
        let err = engine
            .run_turn(
                &ThreadIdentity::new("U2", "T1"),
                TurnInput::Resume(ResumeSignal::post_auth()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::ThreadOwnership { .. }));
        assert!(caps.recorded_executions().is_empty());
    }

    // ========================================================================
    // Continuing a thread
    // ========================================================================

    #[tokio::test]
    async fn test_continue_without_checkpoint_uses_seed() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(reply("Hi there"));
        let engine = engine(
            llm.clone(),
            github_caps(),
            Arc::new(InMemoryCheckpointStore::new()),
        );

        let seed = ConversationState::new(vec![Message::system("You are Archer.")]);
        engine
            .run_turn(
                &identity(),
                TurnInput::Continue {
                    seed,
                    message: Message::user("hello"),
                },
            )
            .await
            .unwrap();

        let messages = &llm.recorded_requests()[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "hello");
    }

    #[tokio::test]
    async fn test_continue_appends_to_checkpoint() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(reply("first"));
        llm.queue_response(reply("second"));
        let engine = engine(
            llm.clone(),
            github_caps(),
            Arc::new(InMemoryCheckpointStore::new()),
        );

        engine
            .run_turn(&identity(), TurnInput::Message(fresh("one")))
            .await
            .unwrap();
        let outcome = engine
            .run_turn(
                &identity(),
                TurnInput::Continue {
                    seed: ConversationState::default(),
                    message: Message::user("two"),
                },
            )
            .await
            .unwrap();

        let contents: Vec<_> = outcome
            .state()
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, ["You are Archer.", "one", "first", "two", "second"]);
    }

    #[tokio::test]
    async fn test_continue_abandons_pending_authorization() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        llm.queue_response(reply("Never mind then."));
        let caps = github_caps();
        let engine = engine(llm.clone(), caps.clone(), Arc::new(InMemoryCheckpointStore::new()));

        let suspended = engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap();
        assert!(suspended.is_suspended());

        let outcome = engine
            .run_turn(
                &identity(),
                TurnInput::Continue {
                    seed: ConversationState::default(),
                    message: Message::user("forget it"),
                },
            )
            .await
            .unwrap();

        assert!(!outcome.is_suspended());
        assert!(outcome.state().pending_auth_message.is_none());
        assert!(caps.recorded_executions().is_empty());

        let request = &llm.recorded_requests()[1];
        let abandoned = request
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(abandoned.tool_call_id.as_deref(), Some("c1"));
        assert!(abandoned.content.contains("not executed"));
        assert_eq!(request.messages.last().unwrap().content, "forget it");
    }

    #[tokio::test]
    async fn test_continue_by_other_user_rejected() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(reply("hello"));
        let engine = engine(llm, github_caps(), Arc::new(InMemoryCheckpointStore::new()));

        engine
            .run_turn(&identity(), TurnInput::Message(fresh("hi")))
            .await
            .unwrap();
        let err = engine
            .run_turn(
                &ThreadIdentity::new("U2", "T1"),
                TurnInput::Continue {
                    seed: ConversationState::default(),
                    message: Message::user("let me in"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::ThreadOwnership { .. }));
    }

    #[tokio::test]
    async fn test_message_by_other_user_rejected() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        llm.queue_response(reply("You have 2 open PRs."));
        let caps = github_caps();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(llm, caps.clone(), store.clone());

        let suspended = engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap();
        assert!(suspended.is_suspended());

        let err = engine
            .run_turn(
                &ThreadIdentity::new("U2", "T1"),
                TurnInput::Message(fresh("overwrite")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::ThreadOwnership { .. }));

        let checkpoint = store.load("T1").await.unwrap().unwrap();
        assert_eq!(checkpoint.identity.user_id, "U1");

        caps.complete_auth("github", "U1");
        let outcome = engine
            .run_turn(&identity(), TurnInput::Resume(ResumeSignal::post_auth()))
            .await
            .unwrap();
        assert!(!outcome.is_suspended());
    }

    #[tokio::test]
    async fn test_authorization_failure_then_continue_answers_orphaned_calls() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        llm.queue_response(reply("Sorry, GitHub is unreachable right now."));
        let caps = Arc::new(
            MockCapabilities::new()
                .with_gated_tool("github", AUTH_URL, ToolOutput::success("2 open PRs"))
                .with_failing_authorizer(),
        );
        let engine = engine(llm.clone(), caps.clone(), Arc::new(InMemoryCheckpointStore::new()));

        let err = engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Authorization(AuthError::Unavailable(_))));
        assert!(caps.recorded_executions().is_empty());

        let outcome = engine
            .run_turn(
                &identity(),
                TurnInput::Continue {
                    seed: ConversationState::default(),
                    message: Message::user("try again later"),
                },
            )
            .await
            .unwrap();
        assert!(!outcome.is_suspended());

        let request = &llm.recorded_requests()[1];
        let roles: Vec<_> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [Role::System, Role::User, Role::Assistant, Role::Tool, Role::User]
        );
        assert_eq!(request.messages[3].tool_call_id.as_deref(), Some("c1"));
        assert!(request.messages[3].content.contains("not executed"));
        assert_eq!(request.messages[4].content, "try again later");
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    #[tokio::test]
    async fn test_concurrent_resumes_execute_tool_once() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "github")]));
        llm.queue_response(reply("You have 2 open PRs."));
        let caps = github_caps();
        let engine = Arc::new(engine(
            llm.clone(),
            caps.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
        ));

        engine
            .run_turn(&identity(), TurnInput::Message(fresh("list my PRs")))
            .await
            .unwrap();
        caps.complete_auth("github", "U1");

        let resume = |engine: Arc<TurnEngine>| {
            tokio::spawn(async move {
                engine
                    .run_turn(&identity(), TurnInput::Resume(ResumeSignal::post_auth()))
                    .await
            })
        };
        let a = resume(Arc::clone(&engine));
        let b = resume(Arc::clone(&engine));

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(caps.recorded_executions().len(), 1);
        assert_eq!(llm.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_second_turn_blocks_until_first_finishes() {
        let llm = Arc::new(DelayedMockLlmClient::new("mock", Duration::from_millis(200)));
        llm.queue_response(reply("first"));
        llm.queue_response(reply("second"));
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = Arc::new(engine(llm.clone(), github_caps(), store.clone()));

        let started = llm.request_started.clone();
        let notified = started.notified();
        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .run_turn(&identity(), TurnInput::Message(fresh("one")))
                    .await
            })
        };
        notified.await;

        let second = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .run_turn(&identity(), TurnInput::Message(fresh("two")))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());
        assert_eq!(llm.recorded_requests().len(), 1);

        assert_eq!(first.await.unwrap().unwrap().state().final_reply(), Some("first"));
        assert_eq!(second.await.unwrap().unwrap().state().final_reply(), Some("second"));
        assert_eq!(store.load("T1").await.unwrap().unwrap().version, 2);
    }

    // ========================================================================
    // Error taxonomy
    // ========================================================================

    #[tokio::test]
    async fn test_model_error_fails_turn_without_checkpoint() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_error(LlmError::server_error("upstream 503"));
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(llm, github_caps(), store.clone());

        let err = engine
            .run_turn(&identity(), TurnInput::Message(fresh("hi")))
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::Model(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_fatal() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "search")]));
        let caps = github_caps();
        let engine = engine(llm, caps.clone(), Arc::new(FailingCheckpointStore));

        let err = engine
            .run_turn(&identity(), TurnInput::Message(fresh("search")))
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::Checkpoint(_)));
        assert!(caps.recorded_executions().is_empty());
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_to_model() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "flaky")]));
        llm.queue_response(reply("Sorry, the lookup failed."));
        let caps = Arc::new(
            MockCapabilities::new().with_tool("flaky", ToolOutput::error("rate limited")),
        );
        let engine = engine(llm.clone(), caps, Arc::new(InMemoryCheckpointStore::new()));

        let outcome = engine
            .run_turn(&identity(), TurnInput::Message(fresh("look it up")))
            .await
            .unwrap();

        assert_eq!(outcome.state().final_reply(), Some("Sorry, the lookup failed."));
        let tool_msg = llm.recorded_requests()[1].messages.last().cloned().unwrap();
        assert_eq!(tool_msg.content, "Error: rate limited\nPlease fix your mistakes.");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back_to_model() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "nope")]));
        llm.queue_response(reply("ok"));
        let engine = engine(llm.clone(), github_caps(), Arc::new(InMemoryCheckpointStore::new()));

        engine
            .run_turn(&identity(), TurnInput::Message(fresh("x")))
            .await
            .unwrap();

        let tool_msg = llm.recorded_requests()[1].messages.last().cloned().unwrap();
        assert!(tool_msg.content.starts_with("Error: unknown tool 'nope'"));
    }

    #[tokio::test]
    async fn test_tool_timeout_is_fed_back_to_model() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        llm.queue_response(calls(&[("c1", "slow")]));
        llm.queue_response(reply("That took too long."));
        let caps = Arc::new(MockCapabilities::new().with_slow_tool(
            "slow",
            Duration::from_secs(5),
            ToolOutput::success("late"),
        ));
        let engine = engine(llm.clone(), caps, Arc::new(InMemoryCheckpointStore::new()))
            .with_config(EngineConfig {
                tool_timeout: Duration::from_millis(50),
                ..EngineConfig::default()
            });

        let outcome = engine
            .run_turn(&identity(), TurnInput::Message(fresh("go")))
            .await
            .unwrap();

        assert!(!outcome.is_suspended());
        let tool_msg = llm.recorded_requests()[1].messages.last().cloned().unwrap();
        assert!(tool_msg.content.contains("timed out"));
        assert!(tool_msg.content.ends_with("Please fix your mistakes."));
    }

    #[tokio::test]
    async fn test_model_timeout_fails_turn() {
        let llm = Arc::new(DelayedMockLlmClient::new("mock", Duration::from_secs(5)));
        llm.queue_response(reply("too late"));
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(llm, github_caps(), store.clone()).with_config(EngineConfig {
            model_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        });

        let err = engine
            .run_turn(&identity(), TurnInput::Message(fresh("hi")))
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::Model(e) if e.kind == crate::llm::LlmErrorKind::TimedOut));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let llm = Arc::new(MockLlmClient::new("mock"));
        for i in 0..5 {
            let id = format!("c{i}");
            llm.queue_response(calls(&[(id.as_str(), "search")]));
        }
        let engine = engine(llm.clone(), github_caps(), Arc::new(InMemoryCheckpointStore::new()))
            .with_config(EngineConfig {
                max_iterations: Some(3),
                ..EngineConfig::default()
            });

        let err = engine
            .run_turn(&identity(), TurnInput::Message(fresh("loop")))
            .await
            .unwrap_err();

        assert!(matches!(err, TurnError::IterationLimit(3)));
        assert_eq!(llm.recorded_requests().len(), 3);
    }
}
