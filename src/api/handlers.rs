//! HTTP request handlers

use super::types::{
    AuthCompleteRequest, AuthLinkQuery, ChallengeResponse, ErrorResponse, EventEnvelope,
    EventResponse, EventStatus, HealthResponse, MessageRequest, ResumeRequest, SetModelRequest,
    SuccessResponse,
};
use super::AppState;
use crate::orchestrator::{EventDisposition, IncomingMessage, TurnReply};
use crate::preferences::{PreferenceError, UserRecord};
use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        // Chat-platform events
        .route("/events", post(receive_event))
        // Direct messages with optional history
        .route("/messages", post(send_message))
        .route("/threads/:id/resume", post(resume_thread))
        // Authorization completion
        .route("/auth", get(redeem_auth_link))
        .route("/auth/complete", post(complete_auth))
        // Settings
        .route("/users/:id/model", put(set_user_model))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn banner() -> &'static str {
    concat!("Archer ", env!("CARGO_PKG_VERSION"), " is running")
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

// ============================================================
// Conversation
// ============================================================

async fn receive_event(
    State(state): State<AppState>,
    Json(envelope): Json<EventEnvelope>,
) -> Result<Response, AppError> {
    if envelope.envelope_type == "url_verification" {
        let challenge = envelope
            .challenge
            .ok_or_else(|| AppError::BadRequest("Missing challenge".to_string()))?;
        return Ok(Json(ChallengeResponse { challenge }).into_response());
    }

    let Some(event) = envelope.into_inbound() else {
        return Ok(Json(EventResponse {
            status: EventStatus::Ignored,
            reply: None,
        })
        .into_response());
    };

    let response = match state.orchestrator.handle_event(event).await {
        EventDisposition::Duplicate => EventResponse {
            status: EventStatus::Duplicate,
            reply: None,
        },
        EventDisposition::Ignored => EventResponse {
            status: EventStatus::Ignored,
            reply: None,
        },
        EventDisposition::Replied(reply) => EventResponse {
            status: EventStatus::Replied,
            reply: Some(reply),
        },
    };
    Ok(Json(response).into_response())
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<TurnReply>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text is empty".to_string()));
    }
    let reply = state
        .orchestrator
        .handle_message(IncomingMessage {
            user_id: req.user_id,
            thread_id: req.thread_id,
            text: req.text,
            history: req.history,
        })
        .await;
    Ok(Json(reply))
}

async fn resume_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(req): Json<ResumeRequest>,
) -> Json<TurnReply> {
    Json(state.orchestrator.resume(&req.user_id, &thread_id).await)
}

// ============================================================
// Authorization
// ============================================================

async fn redeem_auth_link(
    State(state): State<AppState>,
    Query(query): Query<AuthLinkQuery>,
) -> Result<&'static str, AppError> {
    if state
        .authorizer
        .redeem(&query.tool, &query.user, &query.state)
    {
        Ok("Authorization complete. You can return to the conversation.")
    } else {
        Err(AppError::BadRequest(
            "Authorization link is invalid or has expired".to_string(),
        ))
    }
}

/// Out-of-band completion signal from the authorization provider.
///
/// Marks (tool, user) as authorized. When a completion token is configured
/// the caller must send it as `Authorization: Bearer <token>`; without one
/// the route is open and must only be reachable from trusted callers.
async fn complete_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AuthCompleteRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    if let Some(expected) = state.completion_token.as_deref() {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            tracing::warn!(
                tool = %req.tool_name,
                user_id = %req.user_id,
                "Rejected auth completion"
            );
            return Err(AppError::Unauthorized);
        }
    }
    state.authorizer.complete(&req.tool_name, &req.user_id);
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Settings
// ============================================================

async fn set_user_model(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<SetModelRequest>,
) -> Result<Json<UserRecord>, AppError> {
    let record = state
        .orchestrator
        .preferences()
        .set_user_model(&user_id, &req.model)
        .await?;
    Ok(Json(record))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized,
    Internal(String),
}

impl From<PreferenceError> for AppError {
    fn from(e: PreferenceError) -> Self {
        match e {
            PreferenceError::InvalidUserId(_) | PreferenceError::UnknownModel(_) => {
                AppError::BadRequest(e.to_string())
            }
            PreferenceError::Io { .. } | PreferenceError::Corrupt { .. } => {
                tracing::error!(error = %e, "Preference store failure");
                AppError::Internal("Failed to update settings".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
