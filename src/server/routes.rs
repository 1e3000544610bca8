//! HTTP route handlers for the Taskline agent API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::errors::ChatError;
use crate::chat::core::ids::{ConversationId, MessageId, UserId};
use crate::chat::core::message::MessageRecord;
use crate::chat::orchestrator::MessageAcceptance;

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/messages", post(send_message))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(conversation_messages),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "taskline-agent",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Send-message request.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Authenticated user submitting the message.
    pub user_id: UserId,
    /// Existing conversation to continue; omitted to start a new one.
    pub conversation_id: Option<ConversationId>,
    /// Message content.
    pub content: String,
}

/// Send-message response.
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    /// Acceptance state: `accepted` or `queued`.
    pub status: &'static str,
    /// Identifier of the accepted message.
    pub message_id: MessageId,
    /// Conversation the message was routed to.
    pub conversation_id: ConversationId,
    /// 1-based queue position when queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

/// Handle message submission.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), (StatusCode, String)> {
    let acceptance = state
        .orchestrator
        .handle_user_message(request.user_id, request.conversation_id, &request.content)
        .await;

    match acceptance {
        MessageAcceptance::Accepted {
            message_id,
            conversation_id,
        } => Ok((
            StatusCode::ACCEPTED,
            Json(SendMessageResponse {
                status: "accepted",
                message_id,
                conversation_id,
                position: None,
            }),
        )),
        MessageAcceptance::Queued {
            message_id,
            conversation_id,
            position,
        } => Ok((
            StatusCode::ACCEPTED,
            Json(SendMessageResponse {
                status: "queued",
                message_id,
                conversation_id,
                position: Some(position),
            }),
        )),
        MessageAcceptance::Rejected(err) => {
            Err((StatusCode::UNPROCESSABLE_ENTITY, err.to_string()))
        }
        MessageAcceptance::Failed(err) => Err(map_chat_error(&err)),
    }
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Authenticated user requesting the history.
    pub user_id: UserId,
}

/// Message DTO for history responses.
#[derive(Debug, Serialize)]
pub struct MessageDto {
    /// Message identifier.
    pub id: MessageId,
    /// Turn role (`user` or `assistant`).
    pub role: String,
    /// Content payload.
    pub content: String,
    /// Processing status.
    pub status: String,
    /// Failure cause for failed messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<MessageRecord> for MessageDto {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            role: record.role.to_string(),
            content: record.content,
            status: record.status.to_string(),
            failure_reason: record.failure_reason.map(|r| r.to_string()),
            created_at: record.created_at,
        }
    }
}

/// History response.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Ordered messages, oldest first.
    pub messages: Vec<MessageDto>,
    /// Number of messages.
    pub count: usize,
}

/// Handle conversation history requests.
async fn conversation_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    let records = state
        .orchestrator
        .conversation_history(query.user_id, conversation_id)
        .await
        .map_err(|err| map_chat_error(&err))?;

    let messages: Vec<MessageDto> = records.into_iter().map(MessageDto::from).collect();
    let count = messages.len();

    Ok(Json(HistoryResponse { messages, count }))
}

fn map_chat_error(err: &ChatError) -> (StatusCode, String) {
    match err {
        ChatError::NotOwned => (StatusCode::NOT_FOUND, err.to_string()),
        ChatError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        ChatError::Validation(_) | ChatError::InvalidConfig(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
    }
}
