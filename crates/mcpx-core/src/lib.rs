//! mcpx-core - Core traits and types for the mcpx proxy
//!
//! This crate provides the abstractions shared by the transport, gateway
//! and API layers: the capability models republished by the proxy, the
//! [`BackendTransport`] seam every upstream connection implements, the
//! configuration schema (including migration of the deprecated layout),
//! and the per-backend capability registry.

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod models;
pub mod mount;
pub mod registry;
pub mod transport;

pub use config::{
    BackendDefinition, BackendOptions, BackendSpec, Config, LocalSpec, RawConfig, RemoteSpec,
    RemoteTransport, ToolFilterConfig,
};
pub use error::{BackendError, BackendResult, ProxyError, ProxyResult};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use models::*;
pub use mount::{validate_name, Mount, MountTable};
pub use registry::{CapabilityHandler, CapabilityRegistry, HandlerFuture, Registered};
pub use transport::{BackendTransport, TransportFactory, TransportHandle, TransportKind};
