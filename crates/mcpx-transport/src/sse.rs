//! SSE transport: a long-lived event stream plus a POST endpoint
//!
//! `start` opens `GET <url>` and waits for the `endpoint` event naming
//! where requests go. Responses arrive as `message` events on the stream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mcpx_core::{BackendResult, BackendTransport, JsonRpcNotification};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TransportError;
use crate::rpc::RpcClient;
use crate::sse_parser::SseParser;
use crate::{header_map, DEFAULT_CONNECT_TIMEOUT};

/// How long to wait for the `endpoint` event after connecting
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared with the stream reader task
struct SseShared {
    name: String,
    client: Client,
    headers: HeaderMap,
    endpoint: RwLock<Option<Url>>,
    request_timeout: Duration,
}

impl SseShared {
    async fn post<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let endpoint = self
            .endpoint
            .read()
            .clone()
            .ok_or(TransportError::NotStarted)?;

        let response = self
            .client
            .post(endpoint)
            .headers(self.headers.clone())
            .timeout(self.request_timeout)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::SendFailed(format!(
                "endpoint returned {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(())
    }
}

pub struct SseTransport {
    url: Url,
    shared: Arc<SseShared>,
    rpc: Arc<RpcClient>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    pub fn new(
        name: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::InvalidConfig(format!("malformed url '{}': {}", url, e)))?;
        let headers = header_map(headers)?;

        // No overall timeout: the event stream stays open for the process lifetime
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            url,
            shared: Arc::new(SseShared {
                name: name.to_string(),
                client,
                headers,
                endpoint: RwLock::new(None),
                request_timeout: timeout,
            }),
            rpc: Arc::new(RpcClient::new(name, timeout)),
            reader: Mutex::new(None),
        })
    }

    /// Endpoint announced by the server, once started
    pub fn endpoint(&self) -> Option<Url> {
        self.shared.endpoint.read().clone()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let response = self
            .shared
            .client
            .get(self.url.clone())
            .headers(self.shared.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "event stream returned {}",
                status
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let shared = self.shared.clone();
        let rpc = self.rpc.clone();

        let reader = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::new();
            let mut endpoint_tx = Some(endpoint_tx);

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(backend = %shared.name, error = %e, "Event stream failed");
                        break;
                    }
                };

                for event in parser.feed(bytes) {
                    match event.event.as_str() {
                        "endpoint" => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(event.data);
                            }
                        }
                        "message" => {
                            if let Some(reply) = rpc.handle_text(&event.data) {
                                let shared = shared.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = shared.post(&reply).await {
                                        warn!(backend = %shared.name, error = %e, "Failed to answer backend request");
                                    }
                                });
                            }
                        }
                        other => {
                            debug!(backend = %shared.name, event = %other, "Ignoring event");
                        }
                    }
                }
            }

            debug!(backend = %shared.name, "Event stream ended");
            rpc.fail_all();
        });

        let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(TransportError::ConnectionFailed(
                    "event stream closed before endpoint event".to_string(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(TransportError::Timeout(
                    "waiting for endpoint event".to_string(),
                ));
            }
        };

        let endpoint = self.url.join(&endpoint).map_err(|e| {
            reader.abort();
            TransportError::ProtocolError(format!("invalid endpoint '{}': {}", endpoint, e))
        })?;

        info!(backend = %self.shared.name, endpoint = %endpoint, "Event stream connected");
        *self.shared.endpoint.write() = Some(endpoint);
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl BackendTransport for SseTransport {
    async fn start(&self) -> BackendResult<()> {
        self.connect().await?;
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> BackendResult<Value> {
        let (id, request) = self.rpc.next_request(method, params);
        let pending = self.rpc.register(id);
        self.shared.post(&request).await?;
        pending.wait().await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> BackendResult<()> {
        self.shared
            .post(&JsonRpcNotification::new(method, params))
            .await?;
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
            debug!(backend = %self.shared.name, "Event stream closed");
        }
        self.shared.endpoint.write().take();
        self.rpc.fail_all();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}
