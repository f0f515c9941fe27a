//! Pure state transition function
//!
//! Given the node that just ran, the state it ran against, and the event it
//! produced, compute the next state and where control goes. No I/O happens
//! here; the executor performs effects and feeds their outcome back in.

use super::{ConversationState, Event, Node, PendingAuthorization};
use crate::llm::Message;
use std::collections::HashSet;
use thiserror::Error;

/// Where control goes after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Goto(Node),
    /// Stop the turn and persist; the message is surfaced to the user
    Suspend { message: String },
    Done,
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConversationState,
    pub next: Next,
}

impl TransitionResult {
    fn goto(state: ConversationState, node: Node) -> Self {
        let next = if node == Node::Done {
            Next::Done
        } else {
            Next::Goto(node)
        };
        Self {
            new_state: state,
            next,
        }
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Invalid transition: {event} is not accepted at node {node}")]
    InvalidTransition { node: Node, event: &'static str },
    #[error("Model returned a {0} message where an assistant message was expected")]
    UnexpectedRole(&'static str),
}

/// Pure transition function.
///
/// Given the same inputs it always produces the same outputs.
pub fn transition(
    node: Node,
    state: &ConversationState,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (node, event) {
        // ============================================================
        // agent -> route
        // ============================================================
        (
            Node::Agent,
            Event::ModelResponded {
                message,
                auth_gated,
            },
        ) => {
            if message.role != crate::llm::Role::Assistant {
                return Err(TransitionError::UnexpectedRole(message.role.as_str()));
            }
            let next = route(&message, &auth_gated);
            Ok(TransitionResult::goto(state.with_message(message), next))
        }

        // ============================================================
        // check_auth
        // ============================================================
        (Node::CheckAuth, Event::AuthChecked { pending }) => {
            let mut new_state = state.clone();
            if pending.is_empty() {
                new_state.pending_auth_message = None;
                Ok(TransitionResult::goto(new_state, Node::Tools))
            } else {
                new_state.pending_auth_message = Some(format_auth_message(&pending));
                Ok(TransitionResult::goto(new_state, Node::AuthInterrupt))
            }
        }

        // ============================================================
        // auth_interrupt
        // ============================================================
        (Node::AuthInterrupt, Event::Resume { signal }) => {
            let mut new_state = state.clone();
            new_state.resume_signal = Some(signal);
            Ok(evaluate_gate(new_state))
        }

        (Node::AuthInterrupt, Event::GateReached) => Ok(evaluate_gate(state.clone())),

        // ============================================================
        // tools
        // ============================================================
        (Node::Tools, Event::ToolsExecuted { results }) => {
            if results.is_empty() {
                return Ok(TransitionResult::goto(state.clone(), Node::Done));
            }
            let mut new_state = state.clone();
            new_state.messages.extend(results);
            Ok(TransitionResult::goto(new_state, Node::Agent))
        }

        (node, event) => Err(TransitionError::InvalidTransition {
            node,
            event: event.name(),
        }),
    }
}

/// Decide where a fresh model message goes.
///
/// No tool calls ends the turn; calls with nothing gated go straight to
/// execution; anything gated goes through the authorization check first.
pub fn route(message: &Message, auth_gated: &[String]) -> Node {
    if !message.has_tool_calls() {
        Node::Done
    } else if auth_gated.is_empty() {
        Node::Tools
    } else {
        Node::CheckAuth
    }
}

/// The gate: a resume signal always wins and clears both auth fields.
fn evaluate_gate(mut state: ConversationState) -> TransitionResult {
    if state.resume_signal.is_some() {
        state.resume_signal = None;
        state.pending_auth_message = None;
        return TransitionResult::goto(state, Node::Tools);
    }
    match state.pending_auth_message.clone() {
        Some(message) => TransitionResult {
            new_state: state,
            next: Next::Suspend { message },
        },
        None => TransitionResult::goto(state, Node::Tools),
    }
}

/// Build the user-facing authorization request.
///
/// One tool gets a single sentence; several get a numbered list in the order
/// first encountered, each tool once.
pub fn format_auth_message(pending: &[PendingAuthorization]) -> String {
    let mut seen = HashSet::new();
    let unique: Vec<&PendingAuthorization> = pending
        .iter()
        .filter(|p| seen.insert(p.tool_name.as_str()))
        .collect();

    let link = |p: &PendingAuthorization| {
        p.authorization_url
            .clone()
            .unwrap_or_else(|| "(no authorization link available)".to_string())
    };

    match unique.as_slice() {
        [] => String::new(),
        [single] => format!(
            "Please authorize the {} tool by visiting:\n{}",
            single.tool_name,
            link(single)
        ),
        many => {
            let mut out = String::from("Please authorize the following tools:\n");
            for (i, p) in many.iter().enumerate() {
                out.push_str(&format!("{}. {}: {}\n", i + 1, p.tool_name, link(p)));
            }
            out.trim_end().to_string()
        }
    }
}
