//! Fleet orchestration
//!
//! Every backend is bootstrapped on its own task. A backend that comes up
//! is mounted and gets its keepalive; one that fails is either dropped with
//! a log line or, when `panicIfInvalid` is set, aborts the whole startup.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use mcpx_core::{
    validate_name, BackendDefinition, Implementation, Mount, MountTable, ProxyError, ProxyResult,
    TransportFactory,
};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::session::{BackendSession, KEEPALIVE_INTERVAL};

/// Releases one serving backend during shutdown
#[derive(Debug, Clone)]
pub struct ShutdownHook {
    session: Arc<BackendSession>,
}

impl ShutdownHook {
    pub fn backend(&self) -> &str {
        self.session.name()
    }

    pub async fn run(self) {
        info!(backend = %self.session.name(), "Shutting down");
        self.session.close().await;
    }
}

/// Everything that came up: the sealed mount table and one shutdown hook
/// per serving backend
#[derive(Debug)]
pub struct Fleet {
    mounts: MountTable,
    sessions: Vec<Arc<BackendSession>>,
}

impl Fleet {
    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    pub fn sessions(&self) -> &[Arc<BackendSession>] {
        &self.sessions
    }

    pub fn shutdown_hooks(&self) -> Vec<ShutdownHook> {
        self.sessions
            .iter()
            .map(|session| ShutdownHook {
                session: session.clone(),
            })
            .collect()
    }

    /// Run every shutdown hook concurrently
    pub async fn shutdown(&self) {
        join_all(self.shutdown_hooks().into_iter().map(ShutdownHook::run)).await;
    }
}

/// Mounts and sessions collected while the fleet starts up
#[derive(Default)]
struct Startup {
    mounts: Mutex<MountTable>,
    sessions: Mutex<Vec<Arc<BackendSession>>>,
}

/// Drives concurrent bootstrap of all configured backends
pub struct Orchestrator {
    factory: Arc<dyn TransportFactory>,
    client_info: Implementation,
    cancel: CancellationToken,
    keepalive_interval: Duration,
}

impl Orchestrator {
    /// `client_info` is what the proxy calls itself in each handshake.
    /// Keepalive tasks stop when `cancel` fires.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        client_info: Implementation,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            client_info,
            cancel,
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Bootstrap every backend and wait for all of them.
    ///
    /// Returns the first escalated error, after closing whatever did come
    /// up. Non-escalating failures leave the backend out of the fleet.
    pub async fn launch(&self, backends: Vec<BackendDefinition>) -> ProxyResult<Fleet> {
        let startup = Arc::new(Startup::default());
        let mut tasks = JoinSet::new();

        for backend in backends {
            let factory = self.factory.clone();
            let client_info = self.client_info.clone();
            let cancel = self.cancel.clone();
            let keepalive_interval = self.keepalive_interval;
            let startup = startup.clone();

            tasks.spawn(async move {
                let name = backend.name.clone();
                let escalate = backend.options.panic_if_invalid;

                match bring_up(factory, backend, client_info, cancel, keepalive_interval, &startup)
                    .await
                {
                    Ok(()) => {
                        info!(backend = %name, "Connected");
                        Ok(())
                    }
                    Err(e) => {
                        error!(backend = %name, error = %e, "Failed to add backend to server");
                        if escalate {
                            Err(e)
                        } else {
                            Ok(())
                        }
                    }
                }
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => error!(error = %e, "Bootstrap task panicked"),
            }
        }

        let mounts = std::mem::take(&mut *startup.mounts.lock());
        let sessions = std::mem::take(&mut *startup.sessions.lock());
        let fleet = Fleet { mounts, sessions };

        if let Some(e) = first_error {
            warn!(serving = fleet.sessions.len(), "Startup aborted, closing serving backends");
            fleet.shutdown().await;
            return Err(e);
        }

        info!(backends = fleet.mounts.len(), "All clients initialized");
        Ok(fleet)
    }
}

/// Take one backend from configuration to mounted
async fn bring_up(
    factory: Arc<dyn TransportFactory>,
    backend: BackendDefinition,
    client_info: Implementation,
    cancel: CancellationToken,
    keepalive_interval: Duration,
    startup: &Startup,
) -> ProxyResult<()> {
    validate_name(&backend.name)?;
    info!(backend = %backend.name, "Connecting");
    let handle = factory.create(&backend.name, &backend.spec).await?;
    let session = Arc::new(BackendSession::new(&backend.name, handle, backend.options));

    let registry = match session.bootstrap(client_info).await {
        Ok(registry) => registry,
        Err(e) => {
            session.close().await;
            return Err(e);
        }
    };

    let options = session.options();
    let mount = Mount {
        name: backend.name.clone(),
        auth_tokens: options.auth_tokens.clone(),
        log_enabled: options.log_enabled,
        registry: Arc::new(registry),
    };
    let mounted = startup.mounts.lock().push(mount);
    if let Err(e) = mounted {
        session.close().await;
        return Err(e);
    }

    session.start_keepalive(cancel, keepalive_interval);
    startup.sessions.lock().push(session);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpx_core::config::{BackendOptions, BackendSpec, LocalSpec};
    use mcpx_transport::{MockTransport, MockTransportFactory};
    use std::collections::BTreeMap;

    fn definition(name: &str, panic_if_invalid: bool) -> BackendDefinition {
        BackendDefinition {
            name: name.to_string(),
            spec: BackendSpec::Local(LocalSpec {
                command: "unused".to_string(),
                args: vec![],
                env: BTreeMap::new(),
            }),
            options: BackendOptions {
                panic_if_invalid,
                auth_tokens: vec![format!("{}-token", name)],
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_mount_carries_options() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.insert("a", Arc::new(MockTransport::local().with_tools(&["t"])));

        let orchestrator = Orchestrator::new(
            factory,
            Implementation::new("mcpx", "test"),
            CancellationToken::new(),
        );
        let fleet = orchestrator.launch(vec![definition("a", false)]).await.unwrap();

        let mount = fleet.mounts().get("a").unwrap();
        assert_eq!(mount.auth_tokens, vec!["a-token".to_string()]);
        assert_eq!(mount.registry.tools().len(), 1);
        assert_eq!(fleet.shutdown_hooks().len(), 1);
        assert_eq!(fleet.shutdown_hooks()[0].backend(), "a");
    }

    #[tokio::test]
    async fn test_unknown_transport_follows_policy() {
        let factory = Arc::new(MockTransportFactory::new());
        let orchestrator = Orchestrator::new(
            factory,
            Implementation::new("mcpx", "test"),
            CancellationToken::new(),
        );

        let fleet = orchestrator.launch(vec![definition("ghost", false)]).await.unwrap();
        assert!(fleet.mounts().is_empty());

        let err = orchestrator
            .launch(vec![definition("ghost", true)])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::TransportConstruction { .. }));
    }
}
