//! Per-backend capability registry
//!
//! Filled once while a backend's capabilities are synced, then frozen
//! behind an `Arc` and only read from.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::BackendResult;
use crate::models::{Prompt, Resource, ResourceTemplate, Tool};

/// Future returned by a forwarding handler
pub type HandlerFuture = BoxFuture<'static, BackendResult<Value>>;

/// Forwards a client's request params to the owning backend
pub type CapabilityHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// A capability item bound to its forwarding handler
#[derive(Clone)]
pub struct Registered<T> {
    pub item: T,
    pub handler: CapabilityHandler,
}

impl<T> Registered<T> {
    /// Invoke the bound handler
    pub fn invoke(&self, params: Value) -> HandlerFuture {
        (self.handler)(params)
    }
}

impl<T: fmt::Debug> fmt::Debug for Registered<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registered")
            .field("item", &self.item)
            .finish_non_exhaustive()
    }
}

/// Four ordered capability collections.
///
/// Tools and prompts are keyed by name, resources by URI and templates by
/// URI template. Adding an item whose key is already present replaces the
/// earlier entry in its original position.
#[derive(Debug, Default, Clone)]
pub struct CapabilityRegistry {
    tools: Vec<Registered<Tool>>,
    prompts: Vec<Registered<Prompt>>,
    resources: Vec<Registered<Resource>>,
    resource_templates: Vec<Registered<ResourceTemplate>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tool(&mut self, tool: Tool, handler: CapabilityHandler) {
        upsert(&mut self.tools, tool, handler, |t| t.name.as_str());
    }

    pub fn add_prompt(&mut self, prompt: Prompt, handler: CapabilityHandler) {
        upsert(&mut self.prompts, prompt, handler, |p| p.name.as_str());
    }

    pub fn add_resource(&mut self, resource: Resource, handler: CapabilityHandler) {
        upsert(&mut self.resources, resource, handler, |r| r.uri.as_str());
    }

    pub fn add_resource_template(&mut self, template: ResourceTemplate, handler: CapabilityHandler) {
        upsert(&mut self.resource_templates, template, handler, |t| {
            t.uri_template.as_str()
        });
    }

    pub fn tools(&self) -> &[Registered<Tool>] {
        &self.tools
    }

    pub fn prompts(&self) -> &[Registered<Prompt>] {
        &self.prompts
    }

    pub fn resources(&self) -> &[Registered<Resource>] {
        &self.resources
    }

    pub fn resource_templates(&self) -> &[Registered<ResourceTemplate>] {
        &self.resource_templates
    }

    /// Find a tool by name
    pub fn tool(&self, name: &str) -> Option<&Registered<Tool>> {
        self.tools.iter().find(|t| t.item.name == name)
    }

    /// Find a prompt by name
    pub fn prompt(&self, name: &str) -> Option<&Registered<Prompt>> {
        self.prompts.iter().find(|p| p.item.name == name)
    }

    /// Resolve a URI to a handler: exact resource first, then the first
    /// matching template
    pub fn resource_handler(&self, uri: &str) -> Option<&CapabilityHandler> {
        self.resources
            .iter()
            .find(|r| r.item.uri == uri)
            .map(|r| &r.handler)
            .or_else(|| {
                self.resource_templates
                    .iter()
                    .find(|t| t.item.matches(uri))
                    .map(|t| &t.handler)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
            && self.prompts.is_empty()
            && self.resources.is_empty()
            && self.resource_templates.is_empty()
    }
}

fn upsert<T>(
    entries: &mut Vec<Registered<T>>,
    item: T,
    handler: CapabilityHandler,
    key: fn(&T) -> &str,
) {
    let entry = Registered { item, handler };
    match entries.iter_mut().find(|e| key(&e.item) == key(&entry.item)) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}
