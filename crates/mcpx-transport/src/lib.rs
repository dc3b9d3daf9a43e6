//! mcpx-transport - Backend transports for the mcpx proxy
//!
//! This crate provides the [`BackendTransport`] implementations used to
//! reach upstream MCP servers:
//! - Stdio: a spawned child process speaking newline-delimited JSON
//! - SSE: a long-lived event stream plus a POST endpoint
//! - Streamable HTTP: one POST per message, JSON or SSE responses
//! - Mock: scripted transport for testing

pub mod error;
pub mod mock;
pub mod rpc;
pub mod sse;
pub mod sse_parser;
pub mod stdio;
pub mod streamable;

pub use error::TransportError;
pub use mock::{MockTransport, MockTransportFactory};
pub use rpc::{PendingRequest, RpcClient, DEFAULT_REQUEST_TIMEOUT};
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable::StreamableHttpTransport;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcpx_core::config::BackendSpec;
use mcpx_core::{
    BackendTransport, ProxyError, ProxyResult, RemoteTransport, TransportFactory, TransportHandle,
    TransportKind,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Connect timeout for remote backends
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Convert configured headers into a reqwest header map
pub(crate) fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            TransportError::InvalidConfig(format!("invalid header name '{}': {}", name, e))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            TransportError::InvalidConfig(format!("invalid value for header '{}': {}", name, e))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Create a transport for backend `name` based on its spec
pub async fn create_transport(
    name: &str,
    spec: &BackendSpec,
) -> Result<TransportHandle, TransportError> {
    let (transport, kind): (Arc<dyn BackendTransport>, TransportKind) = match spec {
        BackendSpec::Local(local) => {
            let transport = StdioTransport::spawn(name, local, DEFAULT_REQUEST_TIMEOUT)?;
            (Arc::new(transport), TransportKind::Stdio)
        }
        BackendSpec::Remote(remote) => {
            let timeout = remote.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
            match remote.transport {
                RemoteTransport::Sse => {
                    let transport = SseTransport::new(name, &remote.url, &remote.headers, timeout)?;
                    (Arc::new(transport), TransportKind::Sse)
                }
                RemoteTransport::StreamableHttp => {
                    let transport = StreamableHttpTransport::new(
                        name,
                        &remote.url,
                        &remote.headers,
                        timeout,
                    )?;
                    (Arc::new(transport), TransportKind::StreamableHttp)
                }
            }
        }
    };

    debug!(backend = %name, kind = %kind, "Transport created");
    Ok(TransportHandle::new(transport, kind))
}

/// Factory building real transports
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn create(&self, name: &str, spec: &BackendSpec) -> ProxyResult<TransportHandle> {
        create_transport(name, spec)
            .await
            .map_err(|e| ProxyError::TransportConstruction {
                backend: name.to_string(),
                message: e.to_string(),
            })
    }
}
