//! Streamable HTTP endpoint: one JSON-RPC message per POST

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use mcpx_core::error::codes;
use mcpx_core::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};

use crate::state::MountState;

/// POST /{name}/mcp
pub async fn post_mcp(State(state): State<MountState>, body: Bytes) -> Response {
    let message = match std::str::from_utf8(&body)
        .map_err(|e| e.to_string())
        .and_then(JsonRpcMessage::parse)
    {
        Ok(message) => message,
        Err(e) => {
            let error = JsonRpcError {
                code: codes::PARSE_ERROR,
                message: format!("Parse error: {}", e),
                data: None,
            };
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::failure(None, error)),
            )
                .into_response();
        }
    };

    match state.server.handle_message(message).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
