//! Transport layer errors

use mcpx_core::BackendError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Transport not started")]
    NotStarted,
}

impl From<TransportError> for BackendError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionClosed => BackendError::Closed,
            TransportError::Timeout(_) => BackendError::Timeout,
            TransportError::ProtocolError(msg) => BackendError::Protocol(msg),
            other => BackendError::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::ConnectionFailed(err.to_string())
        } else {
            TransportError::SendFailed(err.to_string())
        }
    }
}
