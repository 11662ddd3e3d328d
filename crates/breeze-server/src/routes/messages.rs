use crate::state::AppState;
use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use breeze::chat::{ChatSurface, MessageId};
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct MessageRequest {
    content: String,
}

/// A message as shown to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub id: String,
    pub content: String,
}

// Server-sent events carrying the updates of one turn
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

// Event formatting for the stream
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_event(event: &str, data: &Value) -> String {
        format!("event: {}\ndata: {}\n\n", event, data)
    }

    fn format_message(id: &str, content: &str) -> String {
        Self::format_event("message", &json!({ "id": id, "content": content }))
    }

    fn format_token(id: &str, delta: &str) -> String {
        Self::format_event("token", &json!({ "id": id, "delta": delta }))
    }

    fn format_done(final_output: &str) -> String {
        Self::format_event("done", &json!({ "final_output": final_output }))
    }

    fn format_error(error: &str) -> String {
        Self::format_event("error", &json!({ "error": error }))
    }
}

/// Relays interface commands to the client as stream events
struct ChannelSurface {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl ChatSurface for ChannelSurface {
    async fn send(&self, content: &str) -> anyhow::Result<MessageId> {
        let id = Uuid::new_v4().to_string();
        self.tx
            .send(ProtocolFormatter::format_message(&id, content))
            .await
            .map_err(|_| anyhow!("client disconnected"))?;
        Ok(MessageId(id))
    }

    async fn stream_token(&self, id: &MessageId, token: &str) -> anyhow::Result<()> {
        self.tx
            .send(ProtocolFormatter::format_token(&id.0, token))
            .await
            .map_err(|_| anyhow!("client disconnected"))
    }
}

// An id without a session gets a fresh one, kept until `DELETE /sessions/:id`.
// Nothing expires sessions, so every distinct id a client posts to stays in memory.
async fn handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> SseResponse {
    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    // The turn runs on its own so the response can start streaming right away
    tokio::spawn(async move {
        let surface = ChannelSurface { tx: tx.clone() };
        let event = match state
            .app
            .on_message(&session_id, &request.content, &surface)
            .await
        {
            Ok(outcome) => ProtocolFormatter::format_done(&outcome.final_output),
            Err(e) => {
                tracing::error!(session = %session_id, "Error processing message: {}", e);
                ProtocolFormatter::format_error(&e.to_string())
            }
        };
        let _ = tx.send(event).await;
    });

    SseResponse::new(stream)
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions/:session_id/messages", post(handler))
        .with_state(state)
}
