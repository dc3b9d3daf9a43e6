//! BackendTransport trait - the seam every upstream connection implements

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::BackendSpec;
use crate::error::{BackendError, BackendResult, ProxyResult};
use crate::models::{
    cursor_params, CapabilityKind, InitializeRequest, InitializeResult, Page, Prompt, Resource,
    ResourceTemplate, Tool,
};

/// Kind of upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Spawned child process speaking newline-delimited JSON on stdio
    Stdio,
    /// Remote server-sent-events endpoint
    Sse,
    /// Remote streamable HTTP endpoint
    StreamableHttp,
}

impl TransportKind {
    /// Remote connections open their stream with an explicit start call
    pub fn needs_explicit_start(&self) -> bool {
        !matches!(self, TransportKind::Stdio)
    }

    /// Remote connections can go silently stale and are pinged
    pub fn needs_keepalive(&self) -> bool {
        !matches!(self, TransportKind::Stdio)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
        })
    }
}

/// Connection to one backend.
///
/// Implementations provide the four primitives; every protocol operation
/// the proxy uses is built on top of `request` and `notify`.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Open the underlying connection. A no-op for transports that are
    /// live from construction.
    async fn start(&self) -> BackendResult<()>;

    /// Send a request and wait for its result
    async fn request(&self, method: &str, params: Option<Value>) -> BackendResult<Value>;

    /// Send a notification (no response expected)
    async fn notify(&self, method: &str, params: Option<Value>) -> BackendResult<()>;

    /// Release the connection. Calling it twice is harmless.
    async fn close(&self) -> BackendResult<()>;

    // =========================================================================
    // Protocol operations
    // =========================================================================

    /// Perform the `initialize` handshake and confirm it with
    /// `notifications/initialized`
    async fn initialize(&self, request: InitializeRequest) -> BackendResult<InitializeResult> {
        let params = serde_json::to_value(&request)
            .map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        let result = self.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| BackendError::Protocol(format!("invalid initialize result: {}", e)))?;
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Liveness probe
    async fn ping(&self) -> BackendResult<()> {
        self.request("ping", None).await.map(|_| ())
    }

    async fn list_tools(&self, cursor: Option<String>) -> BackendResult<Page<Tool>> {
        let kind = CapabilityKind::Tools;
        let result = self
            .request(kind.list_method(), cursor_params(cursor.as_deref()))
            .await?;
        Page::from_result(kind, result)
    }

    async fn list_prompts(&self, cursor: Option<String>) -> BackendResult<Page<Prompt>> {
        let kind = CapabilityKind::Prompts;
        let result = self
            .request(kind.list_method(), cursor_params(cursor.as_deref()))
            .await?;
        Page::from_result(kind, result)
    }

    async fn list_resources(&self, cursor: Option<String>) -> BackendResult<Page<Resource>> {
        let kind = CapabilityKind::Resources;
        let result = self
            .request(kind.list_method(), cursor_params(cursor.as_deref()))
            .await?;
        Page::from_result(kind, result)
    }

    async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> BackendResult<Page<ResourceTemplate>> {
        let kind = CapabilityKind::ResourceTemplates;
        let result = self
            .request(kind.list_method(), cursor_params(cursor.as_deref()))
            .await?;
        Page::from_result(kind, result)
    }

    /// Forward `tools/call` with the client's params untouched
    async fn call_tool(&self, params: Value) -> BackendResult<Value> {
        self.request("tools/call", Some(params)).await
    }

    /// Forward `prompts/get` with the client's params untouched
    async fn get_prompt(&self, params: Value) -> BackendResult<Value> {
        self.request("prompts/get", Some(params)).await
    }

    /// Forward `resources/read` with the client's params untouched
    async fn read_resource(&self, params: Value) -> BackendResult<Value> {
        self.request("resources/read", Some(params)).await
    }
}

/// A constructed transport plus the lifecycle flags derived from its kind
#[derive(Clone)]
pub struct TransportHandle {
    pub transport: Arc<dyn BackendTransport>,
    pub kind: TransportKind,
    pub needs_explicit_start: bool,
    pub needs_keepalive: bool,
}

impl TransportHandle {
    pub fn new(transport: Arc<dyn BackendTransport>, kind: TransportKind) -> Self {
        Self {
            transport,
            kind,
            needs_explicit_start: kind.needs_explicit_start(),
            needs_keepalive: kind.needs_keepalive(),
        }
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("kind", &self.kind)
            .field("needs_explicit_start", &self.needs_explicit_start)
            .field("needs_keepalive", &self.needs_keepalive)
            .finish()
    }
}

/// Builds transports from normalized backend specs
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Construct the transport for backend `name`. Fails with
    /// [`ProxyError::TransportConstruction`](crate::ProxyError::TransportConstruction).
    async fn create(&self, name: &str, spec: &BackendSpec) -> ProxyResult<TransportHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_flags_by_kind() {
        assert!(!TransportKind::Stdio.needs_explicit_start());
        assert!(!TransportKind::Stdio.needs_keepalive());
        for kind in [TransportKind::Sse, TransportKind::StreamableHttp] {
            assert!(kind.needs_explicit_start());
            assert!(kind.needs_keepalive());
        }
    }
}
