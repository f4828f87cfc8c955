//! Streaming chat endpoint.
//!
//! `POST /api/v1/chat/stream` drives one orchestrator turn and streams its
//! events back as newline-delimited JSON. Each event is serialized and
//! flushed as its own line the moment it arrives; the response carries
//! no-buffering headers so intermediaries pass increments through.

use std::convert::Infallible;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::header,
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

use steward_agent::{
    AgentEvent, Attachment, ChatMessage, ChatRole, ConversationContext, SessionId, TurnRequest,
    stream_turn,
};

use crate::error::{Result, ServerError};
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for the streaming chat endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamRequest {
    /// Ordered conversation history, ending with the user's new message.
    pub messages: Vec<ChatMessage>,

    /// Optional existing session ID. A new session is created if absent.
    #[serde(default)]
    pub session_id: Option<String>,

    /// Optional actor identifier (who is asking).
    #[serde(default)]
    pub actor: Option<String>,

    /// Optional file/image attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/chat/stream - NDJSON streaming chat endpoint.
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> Result<Response> {
    if request.messages.is_empty() {
        return Err(ServerError::BadRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let existing = request
        .session_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(SessionId::from_uuid);

    let session_id = state
        .sessions
        .ensure_session(request.actor.as_deref(), existing)
        .await;

    // Persist the inbound user message without blocking the stream.
    if let Some(message) = request.messages.last().filter(|m| m.role == ChatRole::User) {
        let sessions = state.sessions.clone();
        let content = message.content.clone();
        tokio::spawn(async move {
            if let Err(e) = sessions
                .record_message(session_id, ChatRole::User, &content, None)
                .await
            {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to record user message");
            }
        });
    }

    let context = ConversationContext::from_history(&request.messages);
    let turn_request =
        TurnRequest::new(session_id, context).with_attachments(request.attachments);

    let events = stream_turn(state.turn.clone(), turn_request);

    // Serialize each event as one flushed NDJSON line, persisting the final
    // answer as it passes by.
    let sessions = state.sessions.clone();
    let body_stream = events.map(move |event| {
        if let AgentEvent::Done {
            text, tool_calls, ..
        } = &event
        {
            let sessions = sessions.clone();
            let text = text.clone();
            let metadata = serde_json::json!({ "tool_calls": tool_calls });
            tokio::spawn(async move {
                if let Err(e) = sessions
                    .record_message(session_id, ChatRole::Assistant, &text, Some(metadata))
                    .await
                {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to record assistant message");
                }
            });
        }
        Ok::<_, Infallible>(ndjson_line(&event))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(body_stream))
        .map_err(|e| ServerError::Internal(format!("Failed to build response: {}", e)))
}

/// Encode one event as a newline-terminated JSON record.
fn ndjson_line(event: &AgentEvent) -> Bytes {
    let mut line = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to encode stream event");
        r#"{"kind":"err","error":"event encoding failed"}"#.to_string()
    });
    line.push('\n');
    Bytes::from(line)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
