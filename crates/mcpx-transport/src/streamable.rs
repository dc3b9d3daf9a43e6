//! Streamable HTTP transport: one POST per message
//!
//! Responses come back either as a JSON body or as a short SSE stream that
//! ends with the matching response. The session id handed out by the
//! server on `initialize` is replayed on every later request.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mcpx_core::{
    BackendError, BackendResult, BackendTransport, JsonRpcMessage, JsonRpcNotification,
    JsonRpcResponse, RequestId,
};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::TransportError;
use crate::rpc::RpcClient;
use crate::sse_parser::SseParser;
use crate::{header_map, DEFAULT_CONNECT_TIMEOUT};

/// Session header defined by the streamable HTTP transport
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct StreamableHttpTransport {
    name: String,
    url: Url,
    client: Client,
    headers: HeaderMap,
    session_id: RwLock<Option<String>>,
    rpc: RpcClient,
}

impl StreamableHttpTransport {
    pub fn new(
        name: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::InvalidConfig(format!("malformed url '{}': {}", url, e)))?;
        let headers = header_map(headers)?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            url,
            client,
            headers,
            session_id: RwLock::new(None),
            rpc: RpcClient::new(name, timeout),
        })
    }

    /// Session id assigned by the server, if any
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    async fn post<T: Serialize>(&self, message: &T) -> Result<Response, TransportError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);

        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND && self.session_id().is_some() {
            return Err(TransportError::ConnectionClosed);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::SendFailed(format!(
                "server returned {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(response)
    }

    /// Read the response to request `id` from a JSON or SSE body
    async fn read_response(&self, id: i64, response: Response) -> BackendResult<Value> {
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_stream {
            let body = response.text().await.map_err(TransportError::from)?;
            return match JsonRpcMessage::parse(&body) {
                Ok(JsonRpcMessage::Response(r)) if r.id == Some(RequestId::Number(id)) => {
                    r.into_result()
                }
                Ok(other) => Err(BackendError::Protocol(format!(
                    "unexpected message in response body: {:?}",
                    other
                ))),
                Err(e) => Err(BackendError::Protocol(format!("invalid response body: {}", e))),
            };
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(TransportError::from)?;
            for event in parser.feed(bytes) {
                if event.event != "message" {
                    continue;
                }
                match JsonRpcMessage::parse(&event.data) {
                    Ok(JsonRpcMessage::Response(r)) if r.id == Some(RequestId::Number(id)) => {
                        return r.into_result();
                    }
                    Ok(message) => {
                        if let Some(reply) = self.rpc.handle_inbound(message) {
                            self.send_reply(reply).await;
                        }
                    }
                    Err(e) => {
                        warn!(backend = %self.name, error = %e, "Discarding malformed message");
                    }
                }
            }
        }

        Err(BackendError::Protocol(
            "stream ended without a response".to_string(),
        ))
    }

    async fn send_reply(&self, reply: JsonRpcResponse) {
        if let Err(e) = self.post(&reply).await {
            warn!(backend = %self.name, error = %e, "Failed to answer backend request");
        }
    }
}

#[async_trait]
impl BackendTransport for StreamableHttpTransport {
    async fn start(&self) -> BackendResult<()> {
        debug!(backend = %self.name, url = %self.url, "Streamable HTTP transport ready");
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> BackendResult<Value> {
        let (id, request) = self.rpc.next_request(method, params);
        let response = self.post(&request).await?;

        if method == "initialize" {
            if let Some(session) = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                info!(backend = %self.name, session = %session, "Session established");
                *self.session_id.write() = Some(session.to_string());
            }
        }

        self.read_response(id, response).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> BackendResult<()> {
        let response = self.post(&JsonRpcNotification::new(method, params)).await?;
        trace!(backend = %self.name, status = %response.status(), "Notification accepted");
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        let Some(session) = self.session_id.write().take() else {
            return Ok(());
        };

        let result = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await;

        if let Err(e) = result {
            debug!(backend = %self.name, error = %e, "Session termination failed");
        }
        Ok(())
    }
}
