//! mcpx-api - HTTP front door for the mcpx proxy
//!
//! Every mounted backend is served under `/<name>/` with its own MCP
//! endpoints and its own token check:
//! - `GET /<name>/sse` and `POST /<name>/message` for SSE clients
//! - `POST /<name>/mcp` for streamable HTTP clients
//!
//! # Usage
//!
//! ```ignore
//! use mcpx_api::{create_router, FrontDoor};
//!
//! let front_door = FrontDoor::new(config.mcp_proxy.implementation(), &config.mcp_proxy.base_url);
//! let router = create_router(fleet.mounts(), &front_door, cancel.clone());
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use auth::TokenSet;
pub use error::ApiError;
pub use server::McpServer;
pub use state::MountState;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use mcpx_core::{Implementation, MountTable};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// How the proxy presents itself to clients
#[derive(Debug, Clone)]
pub struct FrontDoor {
    /// Server identity returned from `initialize`
    pub implementation: Implementation,
    /// Public URL prefix used in SSE endpoint events
    pub base_url: String,
}

impl FrontDoor {
    pub fn new(implementation: Implementation, base_url: &str) -> Self {
        Self {
            implementation,
            base_url: base_url.to_string(),
        }
    }
}

/// Create the router serving every mount plus `/health`
pub fn create_router(
    mounts: &MountTable,
    front_door: &FrontDoor,
    cancel: CancellationToken,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new().route("/health", get(|| async { "OK" }));

    for mount in mounts.iter() {
        let path = mount.path();
        let tokens = TokenSet::new(&mount.auth_tokens);
        let server = McpServer::from_mount(mount, front_door.implementation.clone());

        let routes = server
            .router(&front_door.base_url, &path, cancel.clone())
            .layer(middleware::from_fn_with_state(
                tokens.clone(),
                auth::require_token,
            ));
        router = router.nest(&path, routes);

        info!(
            backend = %mount.name,
            sse = %format!("{}{}/sse", front_door.base_url.trim_end_matches('/'), path),
            auth = !tokens.is_open(),
            "Backend mounted"
        );
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
