//! Handshake payloads exchanged during `initialize`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol revision the proxy speaks on both sides
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// Name and version of a protocol participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Capabilities the proxy advertises to a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default)]
    pub experimental: Map<String, Value>,
}

/// Parameters of the `initialize` request sent to each backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

impl InitializeRequest {
    /// Handshake carrying the fixed protocol version and an empty
    /// experimental capability set
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        }
    }
}

/// Result of a successful `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_request_shape() {
        let request = InitializeRequest::new(Implementation::new("mcpx", "1.0.0"));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "protocolVersion": LATEST_PROTOCOL_VERSION,
                "capabilities": {"experimental": {}},
                "clientInfo": {"name": "mcpx", "version": "1.0.0"}
            })
        );
    }
}
