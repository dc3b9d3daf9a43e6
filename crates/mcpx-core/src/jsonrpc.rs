//! JSON-RPC 2.0 message types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BackendError, BackendResult};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier; numbers and strings are both legal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&BackendError> for JsonRpcError {
    fn from(err: &BackendError) -> Self {
        Self {
            code: err.rpc_code(),
            message: err.rpc_message(),
            data: err.rpc_data(),
        }
    }
}

/// Response; `id` is null only when the request could not be read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Convert into the caller-facing result. Backend errors keep their
    /// code, message and data.
    pub fn into_result(self) -> BackendResult<Value> {
        match self.error {
            Some(error) => Err(BackendError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Any single JSON-RPC message
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Classify a decoded JSON value: `method` + `id` is a request,
    /// `method` alone a notification, `id` alone a response.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Some(object) = value.as_object() else {
            return Err("message is not a JSON object".to_string());
        };

        let has_method = object.contains_key("method");
        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let is_response = object.contains_key("result") || object.contains_key("error");

        let parsed = if has_method && has_id {
            serde_json::from_value(value).map(JsonRpcMessage::Request)
        } else if has_method {
            serde_json::from_value(value).map(JsonRpcMessage::Notification)
        } else if is_response {
            serde_json::from_value(value).map(JsonRpcMessage::Response)
        } else {
            return Err("message is neither request, notification nor response".to_string());
        };

        parsed.map_err(|e| e.to_string())
    }

    /// Parse a single message from text
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Self::from_value(value)
    }
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcMessage::Request(r) => r.serialize(serializer),
            JsonRpcMessage::Notification(n) => n.serialize(serializer),
            JsonRpcMessage::Response(r) => r.serialize(serializer),
        }
    }
}
