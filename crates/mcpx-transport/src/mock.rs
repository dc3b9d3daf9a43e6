//! Mock transport for testing
//!
//! Serves scripted capability pages, records every call, and can be told
//! to fail at any lifecycle step.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcpx_core::config::BackendSpec;
use mcpx_core::{
    BackendError, BackendResult, BackendTransport, CapabilityKind, Implementation,
    InitializeRequest, InitializeResult, Page, Prompt, ProxyError, ProxyResult, Resource,
    ResourceTemplate, Tool, TransportFactory, TransportHandle, TransportKind,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Scripted listing responses for one capability kind
type Script<T> = Mutex<VecDeque<BackendResult<Page<T>>>>;

/// Mock backend transport
pub struct MockTransport {
    kind: TransportKind,
    tools: Script<Tool>,
    prompts: Script<Prompt>,
    resources: Script<Resource>,
    resource_templates: Script<ResourceTemplate>,
    start_error: Mutex<Option<BackendError>>,
    initialize_error: Mutex<Option<BackendError>>,
    initialize_delay: Mutex<Duration>,
    ping_error: Mutex<Option<BackendError>>,
    /// Canned results by method for passthrough calls
    results: Mutex<HashMap<String, BackendResult<Value>>>,
    /// Cursor received by every listing call, per kind
    cursors: Mutex<HashMap<CapabilityKind, Vec<Option<String>>>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
    last_initialize: Mutex<Option<InitializeRequest>>,
    starts: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            tools: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(VecDeque::new()),
            resources: Mutex::new(VecDeque::new()),
            resource_templates: Mutex::new(VecDeque::new()),
            start_error: Mutex::new(None),
            initialize_error: Mutex::new(None),
            initialize_delay: Mutex::new(Duration::ZERO),
            ping_error: Mutex::new(None),
            results: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            last_initialize: Mutex::new(None),
            starts: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Mock stdio backend (no start, no keepalive)
    pub fn local() -> Self {
        Self::new(TransportKind::Stdio)
    }

    /// Mock remote backend (explicit start and keepalive)
    pub fn remote() -> Self {
        Self::new(TransportKind::Sse)
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// A single last page of tools with these names
    pub fn with_tools(self, names: &[&str]) -> Self {
        self.push_tool_page(Page::last(names.iter().map(|n| Tool::new(*n)).collect()));
        self
    }

    pub fn push_tool_page(&self, page: Page<Tool>) {
        self.tools.lock().push_back(Ok(page));
    }

    pub fn push_prompt_page(&self, page: Page<Prompt>) {
        self.prompts.lock().push_back(Ok(page));
    }

    pub fn push_resource_page(&self, page: Page<Resource>) {
        self.resources.lock().push_back(Ok(page));
    }

    pub fn push_resource_template_page(&self, page: Page<ResourceTemplate>) {
        self.resource_templates.lock().push_back(Ok(page));
    }

    /// Make the next listing call for `kind` fail
    pub fn fail_listing(&self, kind: CapabilityKind, error: BackendError) {
        match kind {
            CapabilityKind::Tools => self.tools.lock().push_back(Err(error)),
            CapabilityKind::Prompts => self.prompts.lock().push_back(Err(error)),
            CapabilityKind::Resources => self.resources.lock().push_back(Err(error)),
            CapabilityKind::ResourceTemplates => {
                self.resource_templates.lock().push_back(Err(error))
            }
        }
    }

    pub fn fail_start(&self, error: BackendError) {
        *self.start_error.lock() = Some(error);
    }

    pub fn fail_initialize(&self, error: BackendError) {
        *self.initialize_error.lock() = Some(error);
    }

    pub fn fail_ping(&self, error: BackendError) {
        *self.ping_error.lock() = Some(error);
    }

    /// Hold the handshake for `delay` before answering
    pub fn delay_initialize(&self, delay: Duration) {
        *self.initialize_delay.lock() = delay;
    }

    /// Canned result for a passthrough method such as `tools/call`
    pub fn set_result(&self, method: &str, result: BackendResult<Value>) {
        self.results.lock().insert(method.to_string(), result);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Number of listing calls made for `kind`
    pub fn fetches(&self, kind: CapabilityKind) -> usize {
        self.cursors.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Cursors passed to the listing calls for `kind`, in call order
    pub fn cursors(&self, kind: CapabilityKind) -> Vec<Option<String>> {
        self.cursors.lock().get(&kind).cloned().unwrap_or_default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Passthrough requests seen so far, as (method, params)
    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().clone()
    }

    pub fn last_initialize(&self) -> Option<InitializeRequest> {
        self.last_initialize.lock().clone()
    }

    fn next_page<T>(
        &self,
        kind: CapabilityKind,
        cursor: Option<String>,
        script: &Script<T>,
    ) -> BackendResult<Page<T>> {
        self.cursors.lock().entry(kind).or_default().push(cursor);
        script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::last(Vec::new())))
    }
}

#[async_trait]
impl BackendTransport for MockTransport {
    async fn start(&self) -> BackendResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.start_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> BackendResult<Value> {
        self.calls.lock().push((method.to_string(), params.clone()));
        let canned = self.results.lock().get(method).cloned();
        match canned {
            Some(result) => result,
            None => Ok(json!({ "method": method, "params": params })),
        }
    }

    async fn notify(&self, _method: &str, _params: Option<Value>) -> BackendResult<()> {
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn initialize(&self, request: InitializeRequest) -> BackendResult<InitializeResult> {
        let delay = *self.initialize_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        *self.last_initialize.lock() = Some(request.clone());
        let error = self.initialize_error.lock().clone();
        if let Some(error) = error {
            return Err(error);
        }

        Ok(InitializeResult {
            protocol_version: request.protocol_version,
            capabilities: json!({"tools": {}}),
            server_info: Implementation::new("mock", "0.0.0"),
            instructions: None,
        })
    }

    async fn ping(&self) -> BackendResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let error = self.ping_error.lock().clone();
        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn list_tools(&self, cursor: Option<String>) -> BackendResult<Page<Tool>> {
        self.next_page(CapabilityKind::Tools, cursor, &self.tools)
    }

    async fn list_prompts(&self, cursor: Option<String>) -> BackendResult<Page<Prompt>> {
        self.next_page(CapabilityKind::Prompts, cursor, &self.prompts)
    }

    async fn list_resources(&self, cursor: Option<String>) -> BackendResult<Page<Resource>> {
        self.next_page(CapabilityKind::Resources, cursor, &self.resources)
    }

    async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> BackendResult<Page<ResourceTemplate>> {
        self.next_page(CapabilityKind::ResourceTemplates, cursor, &self.resource_templates)
    }
}

/// Factory handing out pre-built mock transports by backend name
#[derive(Default)]
pub struct MockTransportFactory {
    transports: Mutex<HashMap<String, Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the transport returned for backend `name`
    pub fn insert(&self, name: &str, transport: Arc<MockTransport>) {
        self.transports.lock().insert(name.to_string(), transport);
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(&self, name: &str, _spec: &BackendSpec) -> ProxyResult<TransportHandle> {
        let transport = self.transports.lock().get(name).cloned().ok_or_else(|| {
            ProxyError::TransportConstruction {
                backend: name.to_string(),
                message: "no mock transport registered".to_string(),
            }
        })?;
        let kind = transport.kind();
        Ok(TransportHandle::new(transport, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_pages_then_empty() {
        let mock = MockTransport::local();
        mock.push_tool_page(Page::new(vec![Tool::new("a")], Some("p1".into())));

        let first = mock.list_tools(None).await.unwrap();
        assert_eq!(first.items.len(), 1);
        let second = mock.list_tools(Some("p1".into())).await.unwrap();
        assert!(second.items.is_empty());
        assert_eq!(mock.fetches(CapabilityKind::Tools), 2);
    }

    #[tokio::test]
    async fn test_passthrough_records_calls() {
        let mock = MockTransport::local();
        mock.set_result("tools/call", Ok(json!({"content": []})));

        let result = mock.call_tool(json!({"name": "a"})).await.unwrap();
        assert_eq!(result, json!({"content": []}));
        assert_eq!(
            mock.calls(),
            vec![("tools/call".to_string(), Some(json!({"name": "a"})))]
        );
    }

    #[tokio::test]
    async fn test_factory_unknown_backend() {
        let factory = MockTransportFactory::new();
        let spec = BackendSpec::Local(mcpx_core::LocalSpec {
            command: "x".into(),
            args: vec![],
            env: Default::default(),
        });
        let err = factory.create("ghost", &spec).await.unwrap_err();
        assert!(matches!(err, ProxyError::TransportConstruction { .. }));
    }
}
