//! Conversation state types

use crate::llm::{Message, Role, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Thread Identity
// ============================================================================

/// Identity of a conversation thread; the checkpoint key is `thread_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadIdentity {
    pub user_id: String,
    pub thread_id: String,
}

impl ThreadIdentity {
    pub fn new(user_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
        }
    }

    /// Start a new thread for `user_id` with a freshly generated ID
    pub fn generate(user_id: impl Into<String>) -> Self {
        Self::new(user_id, uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.thread_id)
    }
}

/// Opaque token carried by a resume command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeSignal(String);

impl ResumeSignal {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The signal sent after the user reports finishing authorization
    pub fn post_auth() -> Self {
        Self::new("post-auth")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Graph Nodes
// ============================================================================

/// Steps of the turn graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// Invoke the model with the full history
    Agent,
    /// Query authorization status for gated tool calls
    CheckAuth,
    /// Suspension point while authorization is outstanding
    AuthInterrupt,
    /// Execute outstanding tool calls
    Tools,
    /// Terminal
    Done,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Node::Agent => "agent",
            Node::CheckAuth => "check_auth",
            Node::AuthInterrupt => "auth_interrupt",
            Node::Tools => "tools",
            Node::Done => "done",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Conversation State
// ============================================================================

/// State of one conversation, owned by the engine for the length of a turn.
///
/// At most one of `pending_auth_message` and `resume_signal` is active: the
/// transition that observes a resume signal clears both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_auth_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_signal: Option<ResumeSignal>,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            pending_auth_message: None,
            resume_signal: None,
        }
    }

    /// Return a copy with `message` appended
    #[must_use]
    pub fn with_message(&self, message: Message) -> Self {
        let mut next = self.clone();
        next.messages.push(message);
        next
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether the thread is parked on an authorization request
    pub fn is_awaiting_authorization(&self) -> bool {
        self.pending_auth_message.is_some()
    }

    /// Content of the last assistant message, the visible result of a turn
    pub fn final_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Tool calls of the latest assistant message that have no result yet
    pub fn outstanding_tool_calls(&self) -> Vec<ToolCall> {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages[idx]
            .tool_calls
            .iter()
            .filter(|tc| !answered.contains(tc.id.as_str()))
            .cloned()
            .collect()
    }

    /// Close out a suspended or failed turn that will never be resumed.
    ///
    /// Every outstanding call gets a tool result explaining it was skipped,
    /// and the pending authorization message is dropped.
    #[must_use]
    pub fn abandon_outstanding(&self) -> Self {
        let mut next = self.clone();
        for call in self.outstanding_tool_calls() {
            next.messages.push(Message::tool_result(
                call.id,
                format!(
                    "The {} tool was not executed because the previous turn did not complete.",
                    call.name
                ),
            ));
        }
        next.pending_auth_message = None;
        next.resume_signal = None;
        next
    }
}
