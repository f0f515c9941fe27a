//! API request and response types

use crate::orchestrator::{HistoryMessage, InboundEvent, TurnReply};
use serde::{Deserialize, Serialize};

/// Outer envelope posted by the chat platform
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub challenge: Option<String>,
    pub event_id: Option<String>,
    pub event: Option<PlatformEvent>,
}

#[derive(Debug, Deserialize)]
pub struct PlatformEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub user: Option<String>,
    pub text: Option<String>,
    /// Root of the thread the event belongs to
    pub thread_ts: Option<String>,
    pub ts: Option<String>,
    pub bot_id: Option<String>,
}

impl EventEnvelope {
    /// Flatten into the orchestrator's event shape. Replies go to the
    /// event's thread, or start one rooted at the event itself.
    pub fn into_inbound(self) -> Option<InboundEvent> {
        let event = self.event?;
        Some(InboundEvent {
            event_type: event.event_type,
            event_id: self.event_id,
            user_id: event.user,
            text: event.text,
            thread_id: event.thread_ts.or(event.ts),
            bot_id: event.bot_id,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub challenge: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Duplicate,
    Ignored,
    Replied,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<TurnReply>,
}

/// Direct message outside the event envelope
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub user_id: String,
    pub thread_id: Option<String>,
    pub text: String,
    pub history: Option<Vec<HistoryMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthCompleteRequest {
    pub tool_name: String,
    pub user_id: String,
}

/// Query string of an issued authorization link
#[derive(Debug, Deserialize)]
pub struct AuthLinkQuery {
    pub tool: String,
    pub user: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct SetModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
