//! SSE transport endpoints
//!
//! `GET /sse` opens a stream whose first event names the message endpoint
//! for the session. Requests posted there are answered on the stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use bytes::Bytes;
use futures::Stream;
use mcpx_core::JsonRpcMessage;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{MountState, SseSessions};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Drops the session when the client goes away
struct SessionGuard {
    sessions: Arc<SseSessions>,
    id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        debug!(session = %self.id, "SSE session closed");
    }
}

/// GET /{name}/sse
pub async fn open_stream(
    State(state): State<MountState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, mut outbox) = state.sessions.open();
    let endpoint = format!("{}?sessionId={}", state.message_url, id);
    let guard = SessionGuard {
        sessions: state.sessions.clone(),
        id,
    };
    let cancel = state.cancel.clone();
    debug!(session = %id, "SSE session opened");

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint));

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                response = outbox.recv() => response,
            };
            let Some(response) = next else {
                break;
            };

            match serde_json::to_string(&response) {
                Ok(data) => yield Ok(Event::default().event("message").data(data)),
                Err(e) => warn!(error = %e, "Failed to encode response"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /{name}/message?sessionId=...
pub async fn post_message(
    State(state): State<MountState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let session_id = query
        .session_id
        .ok_or_else(|| ApiError::BadRequest("missing sessionId".to_string()))?;
    let id = Uuid::parse_str(&session_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid sessionId '{}'", session_id)))?;
    let outbox = state
        .sessions
        .sender(&id)
        .ok_or_else(|| ApiError::NotFound(format!("session '{}' not found", id)))?;

    let text = std::str::from_utf8(&body)
        .map_err(|e| ApiError::BadRequest(format!("body is not UTF-8: {}", e)))?;
    let message = JsonRpcMessage::parse(text).map_err(ApiError::BadRequest)?;

    let server = state.server.clone();
    tokio::spawn(async move {
        if let Some(response) = server.handle_message(message).await {
            if outbox.send(response).is_err() {
                debug!(session = %id, "Session closed before response was delivered");
            }
        }
    });

    Ok(StatusCode::ACCEPTED)
}
