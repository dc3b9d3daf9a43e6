//! Capability-hosting MCP server
//!
//! Answers the client side of the protocol for one mount from its
//! capability registry: handshake, listings, and forwarding of calls to
//! the registered handlers.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use mcpx_core::error::codes;
use mcpx_core::{
    BackendError, CapabilityHandler, CapabilityRegistry, Implementation, JsonRpcError,
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, Mount, Prompt, Resource, ResourceTemplate,
    Tool, LATEST_PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::handlers;
use crate::state::{MountState, SseSessions};

/// MCP server publishing one registry
#[derive(Debug, Clone)]
pub struct McpServer {
    implementation: Implementation,
    log_enabled: bool,
    registry: Arc<CapabilityRegistry>,
}

impl McpServer {
    pub fn new(implementation: Implementation) -> Self {
        Self {
            implementation,
            log_enabled: false,
            registry: Arc::new(CapabilityRegistry::new()),
        }
    }

    /// Server for a mounted backend, sharing the mount's registry
    pub fn from_mount(mount: &Mount, implementation: Implementation) -> Self {
        Self {
            implementation,
            log_enabled: mount.log_enabled,
            registry: mount.registry.clone(),
        }
    }

    /// Advertise the logging capability and log requests at info
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.log_enabled = enabled;
        self
    }

    pub fn add_tool(&mut self, tool: Tool, handler: CapabilityHandler) {
        Arc::make_mut(&mut self.registry).add_tool(tool, handler);
    }

    pub fn add_prompt(&mut self, prompt: Prompt, handler: CapabilityHandler) {
        Arc::make_mut(&mut self.registry).add_prompt(prompt, handler);
    }

    pub fn add_resource(&mut self, resource: Resource, handler: CapabilityHandler) {
        Arc::make_mut(&mut self.registry).add_resource(resource, handler);
    }

    pub fn add_resource_template(&mut self, template: ResourceTemplate, handler: CapabilityHandler) {
        Arc::make_mut(&mut self.registry).add_resource_template(template, handler);
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Capabilities advertised in the `initialize` result
    pub fn capabilities(&self) -> Value {
        let mut capabilities = Map::new();
        if !self.registry.tools().is_empty() {
            capabilities.insert("tools".into(), json!({"listChanged": true}));
        }
        if !self.registry.prompts().is_empty() {
            capabilities.insert("prompts".into(), json!({"listChanged": true}));
        }
        capabilities.insert(
            "resources".into(),
            json!({"subscribe": true, "listChanged": true}),
        );
        if self.log_enabled {
            capabilities.insert("logging".into(), json!({}));
        }
        Value::Object(capabilities)
    }

    /// Handle one inbound message. Only requests produce a response.
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request).await),
            JsonRpcMessage::Notification(notification) => {
                debug!(method = %notification.method, "Notification from client");
                None
            }
            JsonRpcMessage::Response(response) => {
                debug!(id = ?response.id, "Ignoring response from client");
                None
            }
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if self.log_enabled {
            info!(server = %self.implementation.name, method = %request.method, "Handling request");
        } else {
            debug!(server = %self.implementation.name, method = %request.method, "Handling request");
        }

        let id = request.id;
        let params = request.params.unwrap_or_else(|| json!({}));

        let result = match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => listing("tools", self.registry.tools().iter().map(|t| &t.item)),
            "prompts/list" => listing("prompts", self.registry.prompts().iter().map(|p| &p.item)),
            "resources/list" => {
                listing("resources", self.registry.resources().iter().map(|r| &r.item))
            }
            "resources/templates/list" => listing(
                "resourceTemplates",
                self.registry.resource_templates().iter().map(|t| &t.item),
            ),
            "tools/call" => self.call_tool(params).await,
            "prompts/get" => self.get_prompt(params).await,
            "resources/read" => self.read_resource(params).await,
            "logging/setLevel" if self.log_enabled => Ok(json!({})),
            other => {
                return JsonRpcResponse::failure(
                    Some(id),
                    JsonRpcError {
                        code: codes::METHOD_NOT_FOUND,
                        message: format!("Method not found: {}", other),
                        data: None,
                    },
                )
            }
        };

        match result {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::failure(Some(id), JsonRpcError::from(&e)),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": self.capabilities(),
            "serverInfo": self.implementation,
        })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, BackendError> {
        let name = required_str(&params, "name")?;
        let tool = self
            .registry
            .tool(name)
            .ok_or_else(|| BackendError::NotFound(format!("tool '{}' not found", name)))?;
        tool.invoke(params.clone()).await
    }

    async fn get_prompt(&self, params: Value) -> Result<Value, BackendError> {
        let name = required_str(&params, "name")?;
        let prompt = self
            .registry
            .prompt(name)
            .ok_or_else(|| BackendError::NotFound(format!("prompt '{}' not found", name)))?;
        prompt.invoke(params.clone()).await
    }

    async fn read_resource(&self, params: Value) -> Result<Value, BackendError> {
        let uri = required_str(&params, "uri")?;
        let handler = self
            .registry
            .resource_handler(uri)
            .ok_or_else(|| BackendError::NotFound(format!("resource '{}' not found", uri)))?;
        handler(params.clone()).await
    }

    /// Endpoints for this server, to be nested under `base_path`.
    ///
    /// SSE clients are told to post to `<base_url><base_path>/message`.
    /// Open streams end when `cancel` fires.
    pub fn router(self, base_url: &str, base_path: &str, cancel: CancellationToken) -> Router {
        let state = MountState {
            server: Arc::new(self),
            sessions: Arc::new(SseSessions::default()),
            message_url: format!("{}{}/message", base_url.trim_end_matches('/'), base_path),
            cancel,
        };

        Router::new()
            .route("/sse", get(handlers::sse::open_stream))
            .route("/message", post(handlers::sse::post_message))
            .route("/mcp", post(handlers::streamable::post_mcp))
            .with_state(state)
    }
}

fn listing<'a, T: Serialize + 'a>(
    key: &str,
    items: impl Iterator<Item = &'a T>,
) -> Result<Value, BackendError> {
    let items = items
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BackendError::Protocol(e.to_string()))?;
    let mut result = Map::new();
    result.insert(key.to_string(), Value::Array(items));
    Ok(Value::Object(result))
}

fn required_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, BackendError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::InvalidRequest(format!("missing '{}'", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use mcpx_core::RequestId;
    use pretty_assertions::assert_eq;

    fn echo() -> CapabilityHandler {
        Arc::new(|params: Value| async move { Ok::<_, BackendError>(json!({"echo": params})) }.boxed())
    }

    fn failing() -> CapabilityHandler {
        Arc::new(|_params: Value| {
            async move {
                Err::<Value, _>(BackendError::Rpc {
                    code: -32000,
                    message: "rate limited".into(),
                    data: Some(json!({"retryAfter": 5})),
                })
            }
            .boxed()
        })
    }

    fn server() -> McpServer {
        let mut server = McpServer::new(Implementation::new("mcpx", "1.0.0"));
        server.add_tool(Tool::new("search"), echo());
        server.add_tool(Tool::new("flaky"), failing());
        server.add_prompt(Prompt::new("summarize"), echo());
        server.add_resource(Resource::new("file:///readme", "readme"), echo());
        server.add_resource_template(ResourceTemplate::new("file:///logs/{day}", "logs"), echo());
        server
    }

    async fn call(server: &McpServer, method: &str, params: Value) -> JsonRpcResponse {
        server
            .handle_request(JsonRpcRequest::new(RequestId::Number(1), method, Some(params)))
            .await
    }

    #[tokio::test]
    async fn test_initialize_result() {
        let response = call(&server(), "initialize", json!({})).await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "mcpx");
        assert_eq!(
            result["capabilities"]["resources"],
            json!({"subscribe": true, "listChanged": true})
        );
        assert!(result["capabilities"].get("logging").is_none());

        let logged = server().with_logging(true);
        let result = call(&logged, "initialize", json!({})).await.result.unwrap();
        assert_eq!(result["capabilities"]["logging"], json!({}));
    }

    #[tokio::test]
    async fn test_listings() {
        let server = server();
        let tools = call(&server, "tools/list", json!({})).await.result.unwrap();
        assert_eq!(tools, json!({"tools": [{"name": "search"}, {"name": "flaky"}]}));

        let templates = call(&server, "resources/templates/list", json!({}))
            .await
            .result
            .unwrap();
        assert_eq!(
            templates["resourceTemplates"][0]["uriTemplate"],
            "file:///logs/{day}"
        );
    }

    #[tokio::test]
    async fn test_forwarding() {
        let server = server();
        let params = json!({"name": "search", "arguments": {"q": "x"}});
        let result = call(&server, "tools/call", params.clone()).await.result.unwrap();
        assert_eq!(result["echo"], params);

        let read = call(&server, "resources/read", json!({"uri": "file:///logs/monday"}))
            .await
            .result
            .unwrap();
        assert_eq!(read["echo"]["uri"], "file:///logs/monday");
    }

    #[tokio::test]
    async fn test_backend_error_relayed_verbatim() {
        let response = call(&server(), "tools/call", json!({"name": "flaky"})).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "rate limited");
        assert_eq!(error.data, Some(json!({"retryAfter": 5})));
    }

    #[tokio::test]
    async fn test_unknown_items_and_methods() {
        let server = server();
        let missing = call(&server, "tools/call", json!({"name": "nope"})).await;
        assert_eq!(missing.error.unwrap().code, codes::INVALID_PARAMS);

        let no_name = call(&server, "prompts/get", json!({})).await;
        assert_eq!(no_name.error.unwrap().code, codes::INVALID_PARAMS);

        let unknown = call(&server, "sampling/createMessage", json!({})).await;
        assert_eq!(unknown.error.unwrap().code, codes::METHOD_NOT_FOUND);

        let set_level = call(&server, "logging/setLevel", json!({"level": "info"})).await;
        assert_eq!(set_level.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let message = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert!(server().handle_message(message).await.is_none());
    }
}
