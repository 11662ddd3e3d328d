use crate::routes::messages::OutgoingMessage;
use crate::state::AppState;
use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use breeze::chat::{ChatSurface, MessageId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct CreateSessionResponse {
    session_id: String,
    messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Collects what is shown while a session starts, to return it in one response
#[derive(Default)]
struct BufferedSurface {
    messages: Mutex<Vec<OutgoingMessage>>,
}

impl BufferedSurface {
    fn into_messages(self) -> Vec<OutgoingMessage> {
        self.messages
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChatSurface for BufferedSurface {
    async fn send(&self, content: &str) -> anyhow::Result<MessageId> {
        let id = Uuid::new_v4().to_string();
        self.messages
            .lock()
            .map_err(|_| anyhow!("surface lock poisoned"))?
            .push(OutgoingMessage {
                id: id.clone(),
                content: content.to_string(),
            });
        Ok(MessageId(id))
    }

    async fn stream_token(&self, id: &MessageId, token: &str) -> anyhow::Result<()> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| anyhow!("surface lock poisoned"))?;
        let message = messages
            .iter_mut()
            .find(|message| message.id == id.0)
            .ok_or_else(|| anyhow!("unknown message {}", id.0))?;
        message.content.push_str(token);
        Ok(())
    }
}

fn not_found(session_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Session '{}' not found", session_id),
        }),
    )
        .into_response()
}

// Handlers
async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let surface = BufferedSurface::default();
    match state.app.on_chat_start(&surface).await {
        Ok(session_id) => (
            StatusCode::OK,
            Json(CreateSessionResponse {
                session_id,
                messages: surface.into_messages(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to start session: {}", e),
            }),
        )
            .into_response(),
    }
}

async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.app.sessions().history(&session_id).await {
        Some(history) => (StatusCode::OK, Json(history.messages().to_vec())).into_response(),
        None => not_found(&session_id),
    }
}

async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if state.app.on_chat_end(&session_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(&session_id)
    }
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:session_id/history", get(session_history))
        .route("/sessions/:session_id", delete(end_session))
        .with_state(state)
}
