//! Request/response correlation for streaming transports
//!
//! Outgoing requests get a numeric id and a oneshot slot in the pending
//! table. The transport's reader task feeds every inbound message to
//! [`RpcClient::handle_inbound`], which completes the matching slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use mcpx_core::error::codes;
use mcpx_core::{
    BackendError, BackendResult, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Default time to wait for a response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reserved response slot for one outgoing request.
///
/// The slot is removed from the pending table when this is dropped: after
/// the response arrived, when sending failed, or when the caller stopped
/// waiting.
pub struct PendingRequest<'a> {
    rpc: &'a RpcClient,
    id: i64,
    rx: oneshot::Receiver<JsonRpcResponse>,
}

impl PendingRequest<'_> {
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Wait for the response, up to the client's request timeout
    pub async fn wait(mut self) -> BackendResult<Value> {
        match tokio::time::timeout(self.rpc.timeout, &mut self.rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(BackendError::Closed),
            Err(_) => Err(BackendError::Timeout),
        }
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.rpc.forget(self.id);
    }
}

pub struct RpcClient {
    name: String,
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(name: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Allocate an id and build the request
    pub fn next_request(&self, method: &str, params: Option<Value>) -> (i64, JsonRpcRequest) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        (id, JsonRpcRequest::new(RequestId::Number(id), method, params))
    }

    /// Reserve the response slot for `id`
    pub fn register(&self, id: i64) -> PendingRequest<'_> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        PendingRequest { rpc: self, id, rx }
    }

    fn forget(&self, id: i64) {
        self.pending.lock().remove(&id);
    }

    /// Deliver a response to its waiter. Returns false for unknown ids.
    pub fn complete(&self, response: JsonRpcResponse) -> bool {
        let id = match &response.id {
            Some(RequestId::Number(id)) => *id,
            Some(RequestId::String(s)) => match s.parse::<i64>() {
                Ok(id) => id,
                Err(_) => return false,
            },
            None => return false,
        };

        match self.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding request; waiters see `Closed`
    pub fn fail_all(&self) {
        let drained = self.pending.lock().drain().count();
        if drained > 0 {
            debug!(backend = %self.name, pending = drained, "Dropped outstanding requests");
        }
    }

    /// Number of requests waiting for a response
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Route one inbound message. Returns the reply to send back when the
    /// backend sent a request of its own.
    pub fn handle_inbound(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match message {
            JsonRpcMessage::Response(response) => {
                if !self.complete(response) {
                    warn!(backend = %self.name, "Response for unknown request id");
                }
                None
            }
            JsonRpcMessage::Request(request) => {
                if request.method == "ping" {
                    Some(JsonRpcResponse::success(request.id, json!({})))
                } else {
                    debug!(backend = %self.name, method = %request.method, "Unsupported request from backend");
                    Some(JsonRpcResponse::failure(
                        Some(request.id),
                        JsonRpcError {
                            code: codes::METHOD_NOT_FOUND,
                            message: format!("Method not found: {}", request.method),
                            data: None,
                        },
                    ))
                }
            }
            JsonRpcMessage::Notification(notification) => {
                trace!(backend = %self.name, method = %notification.method, "Notification from backend");
                None
            }
        }
    }

    /// Decode and route one raw text message
    pub fn handle_text(&self, text: &str) -> Option<JsonRpcResponse> {
        match JsonRpcMessage::parse(text) {
            Ok(message) => self.handle_inbound(message),
            Err(e) => {
                warn!(backend = %self.name, error = %e, "Discarding malformed message");
                None
            }
        }
    }
}
