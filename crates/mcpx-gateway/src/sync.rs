//! Capability discovery and registration
//!
//! Every capability kind is collected with the same cursor loop. Items are
//! registered as they arrive, each bound to a handler that forwards to the
//! backend the item came from.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use mcpx_core::{
    BackendResult, BackendTransport, CapabilityHandler, CapabilityKind, CapabilityRegistry, Page,
    ProxyError, ProxyResult,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::filter::{FilterDecision, ToolFilterPolicy};

/// Fetch pages until an empty page or an empty cursor, handing each
/// non-empty page to `register`. Returns the number of fetches made.
pub async fn collect_pages<T, Fetch, Fut, Register>(
    mut fetch: Fetch,
    mut register: Register,
) -> BackendResult<usize>
where
    Fetch: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = BackendResult<Page<T>>>,
    Register: FnMut(Vec<T>),
{
    let mut cursor = None;
    let mut fetches = 0;

    loop {
        let page = fetch(cursor.take()).await?;
        fetches += 1;

        if page.items.is_empty() {
            break;
        }
        register(page.items);

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(fetches)
}

#[derive(Debug, Clone, Copy)]
enum Forward {
    CallTool,
    GetPrompt,
    ReadResource,
}

fn forwarder(transport: &Arc<dyn BackendTransport>, forward: Forward) -> CapabilityHandler {
    let transport = transport.clone();
    Arc::new(move |params: Value| {
        let transport = transport.clone();
        async move {
            match forward {
                Forward::CallTool => transport.call_tool(params).await,
                Forward::GetPrompt => transport.get_prompt(params).await,
                Forward::ReadResource => transport.read_resource(params).await,
            }
        }
        .boxed()
    })
}

/// Turn a listing failure into the backend's outcome: fatal for required
/// kinds, a warning otherwise
fn settle(backend: &str, kind: CapabilityKind, result: BackendResult<usize>) -> ProxyResult<()> {
    match result {
        Ok(fetches) => {
            debug!(backend = %backend, %kind, fetches, "Listing complete");
            Ok(())
        }
        Err(source) if kind.is_required() => Err(ProxyError::CapabilityList {
            backend: backend.to_string(),
            kind,
            source,
        }),
        Err(e) => {
            warn!(backend = %backend, %kind, error = %e, "Failed to list {}, continuing without them", kind);
            Ok(())
        }
    }
}

/// Discover all four capability kinds and build the backend's registry
pub async fn sync_capabilities(
    backend: &str,
    transport: &Arc<dyn BackendTransport>,
    filter: &ToolFilterPolicy,
) -> ProxyResult<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();

    let tools = collect_pages(
        |cursor| transport.list_tools(cursor),
        |tools| {
            info!(backend = %backend, "Successfully listed {} tools", tools.len());
            for tool in tools {
                match filter.decide(&tool.name) {
                    FilterDecision::Keep => {
                        debug!(backend = %backend, tool = %tool.name, "Adding tool");
                        registry.add_tool(tool, forwarder(transport, Forward::CallTool));
                    }
                    FilterDecision::NotInAllowlist => {
                        info!(backend = %backend, tool = %tool.name, "Skipping tool (not in allowlist)");
                    }
                    FilterDecision::Blocked => {
                        info!(backend = %backend, tool = %tool.name, "Skipping blocked tool");
                    }
                }
            }
        },
    )
    .await;
    settle(backend, CapabilityKind::Tools, tools)?;

    let prompts = collect_pages(
        |cursor| transport.list_prompts(cursor),
        |prompts| {
            info!(backend = %backend, "Successfully listed {} prompts", prompts.len());
            for prompt in prompts {
                debug!(backend = %backend, prompt = %prompt.name, "Adding prompt");
                registry.add_prompt(prompt, forwarder(transport, Forward::GetPrompt));
            }
        },
    )
    .await;
    settle(backend, CapabilityKind::Prompts, prompts)?;

    let resources = collect_pages(
        |cursor| transport.list_resources(cursor),
        |resources| {
            info!(backend = %backend, "Successfully listed {} resources", resources.len());
            for resource in resources {
                debug!(backend = %backend, resource = %resource.name, "Adding resource");
                registry.add_resource(resource, forwarder(transport, Forward::ReadResource));
            }
        },
    )
    .await;
    settle(backend, CapabilityKind::Resources, resources)?;

    let templates = collect_pages(
        |cursor| transport.list_resource_templates(cursor),
        |templates| {
            info!(backend = %backend, "Successfully listed {} resource templates", templates.len());
            for template in templates {
                debug!(backend = %backend, template = %template.name, "Adding resource template");
                registry.add_resource_template(template, forwarder(transport, Forward::ReadResource));
            }
        },
    )
    .await;
    settle(backend, CapabilityKind::ResourceTemplates, templates)?;

    Ok(registry)
}
