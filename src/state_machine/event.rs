//! Outputs of graph nodes, fed back into the transition function

use super::state::ResumeSignal;
use crate::llm::Message;
use serde::{Deserialize, Serialize};

/// Events that drive transitions out of a node
#[derive(Debug, Clone)]
pub enum Event {
    /// `agent`: the model produced its next message
    ModelResponded {
        message: Message,
        /// Names of called tools that the registry reports as gated
        auth_gated: Vec<String>,
    },

    /// `check_auth`: authorization status for every gated tool was collected
    AuthChecked { pending: Vec<PendingAuthorization> },

    /// `auth_interrupt` reached on the normal path
    GateReached,

    /// `auth_interrupt` re-entered by a resume command
    Resume { signal: ResumeSignal },

    /// `tools`: one result message per executed call
    ToolsExecuted { results: Vec<Message> },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ModelResponded { .. } => "model_responded",
            Event::AuthChecked { .. } => "auth_checked",
            Event::GateReached => "gate_reached",
            Event::Resume { .. } => "resume",
            Event::ToolsExecuted { .. } => "tools_executed",
        }
    }
}

/// A gated tool whose authorization is not yet completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub tool_name: String,
    pub authorization_url: Option<String>,
}

impl PendingAuthorization {
    pub fn new(tool_name: impl Into<String>, authorization_url: Option<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            authorization_url,
        }
    }
}
