//! Common error types for backends and the proxy lifecycle

use serde_json::Value;
use thiserror::Error;

use crate::models::CapabilityKind;

/// JSON-RPC error codes used when relaying failures to clients
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Result type for calls against a single backend
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by one call against one backend
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Backend answered with a JSON-RPC error object
    #[error("Backend error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code as sent by the backend
        code: i64,
        /// Error message as sent by the backend
        message: String,
        /// Optional structured error data
        data: Option<Value>,
    },

    /// Transport/communication error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// The connection to the backend is gone
    #[error("Connection closed")]
    Closed,

    /// Backend sent something that is not valid protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Requested capability is not registered
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid parameter or request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// Returns the JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i64 {
        match self {
            BackendError::Rpc { code, .. } => *code,
            BackendError::NotFound(_) => codes::INVALID_PARAMS,
            BackendError::InvalidRequest(_) => codes::INVALID_PARAMS,
            BackendError::Protocol(_) => codes::INTERNAL_ERROR,
            BackendError::Transport(_) => codes::INTERNAL_ERROR,
            BackendError::Timeout => codes::INTERNAL_ERROR,
            BackendError::Closed => codes::INTERNAL_ERROR,
        }
    }

    /// Message relayed to the client. Backend messages pass through verbatim.
    pub fn rpc_message(&self) -> String {
        match self {
            BackendError::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Structured data relayed to the client, if any
    pub fn rpc_data(&self) -> Option<Value> {
        match self {
            BackendError::Rpc { data, .. } => data.clone(),
            _ => None,
        }
    }
}

/// Result type for proxy lifecycle operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Lifecycle errors, one variant per failure class
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Configuration could not be loaded or normalized
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport for a backend could not be built or started
    #[error("<{backend}> failed to create transport: {message}")]
    TransportConstruction { backend: String, message: String },

    /// Protocol handshake with a backend failed
    #[error("<{backend}> handshake failed: {source}")]
    Handshake {
        backend: String,
        source: BackendError,
    },

    /// A capability listing call failed
    #[error("<{backend}> failed to list {kind}: {source}")]
    CapabilityList {
        backend: String,
        kind: CapabilityKind,
        source: BackendError,
    },

    /// Request rejected by the per-backend token check
    #[error("Unauthorized: {0}")]
    Auth(String),

    /// Something could not be released during shutdown
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

impl ProxyError {
    /// Name of the backend the error belongs to, if it is backend-scoped
    pub fn backend(&self) -> Option<&str> {
        match self {
            ProxyError::TransportConstruction { backend, .. }
            | ProxyError::Handshake { backend, .. }
            | ProxyError::CapabilityList { backend, .. } => Some(backend),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_passes_through() {
        let err = BackendError::Rpc {
            code: -32001,
            message: "tool exploded".to_string(),
            data: Some(serde_json::json!({"detail": 1})),
        };
        assert_eq!(err.rpc_code(), -32001);
        assert_eq!(err.rpc_message(), "tool exploded");
        assert_eq!(err.rpc_data(), Some(serde_json::json!({"detail": 1})));
    }

    #[test]
    fn test_local_errors_map_to_internal() {
        assert_eq!(BackendError::Timeout.rpc_code(), codes::INTERNAL_ERROR);
        assert_eq!(
            BackendError::NotFound("x".into()).rpc_code(),
            codes::INVALID_PARAMS
        );
    }

    #[test]
    fn test_backend_scope() {
        let err = ProxyError::Handshake {
            backend: "github".into(),
            source: BackendError::Closed,
        };
        assert_eq!(err.backend(), Some("github"));
        assert_eq!(err.to_string(), "<github> handshake failed: Connection closed");
        assert!(ProxyError::Config("bad".into()).backend().is_none());
    }
}
