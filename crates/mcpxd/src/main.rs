//! mcpxd - MCP aggregation daemon
//!
//! Connects to every configured MCP server, mirrors its tools, prompts and
//! resources, and serves each one under `/<name>/` on a single listener.
//!
//! Usage:
//!   mcpxd [-c <path-or-url>] [--insecure] [--shutdown-timeout <secs>]

mod cli;
mod config_source;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mcpx_api::{create_router, FrontDoor};
use mcpx_core::{ProxyError, ProxyResult};
use mcpx_gateway::Orchestrator;
use mcpx_transport::DefaultTransportFactory;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mcpxd=info,mcpx_gateway=info,mcpx_api=info,mcpx_transport=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting mcpxd (MCP aggregation proxy)");
    info!("Loading config from: {}", cli.config);
    let config = config_source::load(&cli.config, cli.insecure).await?;
    let backends = config.backends()?;
    let proxy = config.mcp_proxy;

    let addr = proxy.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let implementation = proxy.implementation();
    let fleet = Orchestrator::new(
        Arc::new(DefaultTransportFactory),
        implementation.clone(),
        shutdown.clone(),
    )
    .launch(backends)
    .await?;

    if shutdown.is_cancelled() {
        fleet.shutdown().await;
        return Ok(());
    }

    let front_door = FrontDoor::new(implementation, &proxy.base_url);
    let app = create_router(fleet.mounts(), &front_door, shutdown.clone());

    info!("Listening on http://{}", addr);
    let graceful = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
    });

    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Shutdown signal received");
            let drained = drain(&mut server, cli.shutdown_timeout()).await;
            // Backends are closed even when the listener could not drain
            fleet.shutdown().await;
            drained?;
        }
        result = &mut server => {
            shutdown.cancel();
            fleet.shutdown().await;
            result.context("server task failed")?.context("server error")?;
        }
    }

    Ok(())
}

/// Wait for the server task to finish serving open connections.
///
/// A server that is still busy after `timeout` is aborted and reported as a
/// shutdown error.
async fn drain(
    server: &mut JoinHandle<std::io::Result<()>>,
    timeout: Duration,
) -> ProxyResult<()> {
    match tokio::time::timeout(timeout, &mut *server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Server shutdown error"),
        Ok(Err(e)) => error!(error = %e, "Server task failed"),
        Err(_) => {
            error!(timeout_secs = timeout.as_secs_f64(), "Server shutdown timed out");
            server.abort();
            return Err(ProxyError::Shutdown(format!(
                "connections still open after {:?}",
                timeout
            )));
        }
    }
    Ok(())
}

/// Cancel the root token on SIGINT or SIGTERM
fn setup_signal_handlers(shutdown: CancellationToken) {
    let on_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                on_sigint.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    {
        let on_sigterm = shutdown;
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown");
                    on_sigterm.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
            }
        });
    }

    #[cfg(not(unix))]
    let _ = shutdown;
}
