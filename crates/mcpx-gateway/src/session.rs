//! Backend session lifecycle
//!
//! A session walks one backend through
//! `Created -> Started -> Initialized -> CapabilitiesSynced -> Serving`,
//! skipping `Started` for transports that are live from construction.
//! Any failing step moves it to `Failed`. Once serving, a keepalive task
//! pings remote backends until the shared cancellation token fires.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mcpx_core::{
    BackendError, BackendOptions, BackendTransport, CapabilityRegistry, Implementation,
    InitializeRequest, InitializeResult, ProxyError, ProxyResult, TransportHandle,
};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::filter::ToolFilterPolicy;
use crate::sync::sync_capabilities;

/// Interval between keepalive pings
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Initialized,
    CapabilitiesSynced,
    Serving,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Started => "started",
            SessionState::Initialized => "initialized",
            SessionState::CapabilitiesSynced => "capabilities-synced",
            SessionState::Serving => "serving",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One backend's lifecycle state and keepalive task
pub struct BackendSession {
    name: String,
    handle: TransportHandle,
    options: BackendOptions,
    state: RwLock<SessionState>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl BackendSession {
    pub fn new(name: &str, handle: TransportHandle, options: BackendOptions) -> Self {
        Self {
            name: name.to_string(),
            handle,
            options,
            state: RwLock::new(SessionState::Created),
            keepalive: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    pub fn transport(&self) -> &Arc<dyn BackendTransport> {
        &self.handle.transport
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        debug!(backend = %self.name, from = %*current, to = %state, "Session state change");
        *current = state;
    }

    fn fail<T>(&self, error: ProxyError) -> ProxyResult<T> {
        self.set_state(SessionState::Failed);
        Err(error)
    }

    /// Open the transport. Only transports that need it are started; for
    /// the others this is a no-op.
    pub async fn start(&self) -> ProxyResult<()> {
        if !self.handle.needs_explicit_start {
            return Ok(());
        }

        let state = self.state();
        if state != SessionState::Created {
            return self.fail(ProxyError::TransportConstruction {
                backend: self.name.clone(),
                message: format!("cannot start a session that is {}", state),
            });
        }

        match self.handle.transport.start().await {
            Ok(()) => {
                self.set_state(SessionState::Started);
                Ok(())
            }
            Err(e) => self.fail(ProxyError::TransportConstruction {
                backend: self.name.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Perform the protocol handshake, identifying as `client_info`
    pub async fn initialize(&self, client_info: Implementation) -> ProxyResult<InitializeResult> {
        let ready = if self.handle.needs_explicit_start {
            SessionState::Started
        } else {
            SessionState::Created
        };
        let state = self.state();
        if state != ready {
            return self.fail(ProxyError::Handshake {
                backend: self.name.clone(),
                source: BackendError::InvalidRequest(format!(
                    "cannot initialize a session that is {}",
                    state
                )),
            });
        }

        match self
            .handle
            .transport
            .initialize(InitializeRequest::new(client_info))
            .await
        {
            Ok(result) => {
                info!(
                    backend = %self.name,
                    server = %result.server_info.name,
                    protocol = %result.protocol_version,
                    "Successfully initialized MCP client"
                );
                self.set_state(SessionState::Initialized);
                Ok(result)
            }
            Err(source) => self.fail(ProxyError::Handshake {
                backend: self.name.clone(),
                source,
            }),
        }
    }

    /// Discover, filter and register the backend's capabilities
    pub async fn sync(&self) -> ProxyResult<CapabilityRegistry> {
        let state = self.state();
        if state != SessionState::Initialized {
            return self.fail(ProxyError::Handshake {
                backend: self.name.clone(),
                source: BackendError::InvalidRequest(format!(
                    "cannot sync capabilities of a session that is {}",
                    state
                )),
            });
        }

        let filter = ToolFilterPolicy::from_config(&self.name, self.options.tool_filter.as_ref());
        match sync_capabilities(&self.name, &self.handle.transport, &filter).await {
            Ok(registry) => {
                self.set_state(SessionState::CapabilitiesSynced);
                Ok(registry)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Run start, handshake and sync. On success the session is serving.
    pub async fn bootstrap(&self, client_info: Implementation) -> ProxyResult<CapabilityRegistry> {
        self.start().await?;
        self.initialize(client_info).await?;
        let registry = self.sync().await?;
        self.set_state(SessionState::Serving);
        Ok(registry)
    }

    /// Start pinging the backend if its transport needs it. The first ping
    /// goes out one `period` from now; the task ends when `cancel` fires.
    pub fn start_keepalive(&self, cancel: CancellationToken, period: Duration) {
        if !self.handle.needs_keepalive || self.state() != SessionState::Serving {
            return;
        }

        let name = self.name.clone();
        let transport = self.handle.transport.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(backend = %name, "Context done, stopping ping");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                match transport.ping().await {
                    Ok(()) => debug!(backend = %name, "Ping OK"),
                    Err(e) => debug!(backend = %name, error = %e, "Ping failed"),
                }
            }
        });

        if let Some(previous) = self.keepalive.lock().replace(handle) {
            previous.abort();
        }
        debug!(backend = %self.name, interval_secs = period.as_secs(), "Keepalive started");
    }

    /// Whether a keepalive task is still running
    pub fn keepalive_running(&self) -> bool {
        self.keepalive
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Release the transport. Safe to call more than once; errors are
    /// logged, not returned.
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        if let Some(handle) = self.keepalive.lock().take() {
            handle.abort();
        }

        match self.handle.transport.close().await {
            Ok(()) => info!(backend = %self.name, "Backend closed"),
            Err(e) => warn!(backend = %self.name, error = %e, "Failed to close backend"),
        }
    }
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("name", &self.name)
            .field("kind", &self.handle.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        if let Some(handle) = self.keepalive.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpx_core::{Page, Tool, TransportKind};
    use mcpx_transport::MockTransport;

    fn session(mock: Arc<MockTransport>) -> BackendSession {
        let kind = mock.kind();
        BackendSession::new("test", TransportHandle::new(mock, kind), BackendOptions::default())
    }

    fn client_info() -> Implementation {
        Implementation::new("mcpx", "test")
    }

    #[tokio::test]
    async fn test_local_bootstrap_skips_start() {
        let mock = Arc::new(MockTransport::local().with_tools(&["a"]));
        let session = session(mock.clone());

        let registry = session.bootstrap(client_info()).await.unwrap();

        assert_eq!(session.state(), SessionState::Serving);
        assert_eq!(registry.tools().len(), 1);
        assert_eq!(mock.starts(), 0);

        let init = mock.last_initialize().unwrap();
        assert_eq!(init.protocol_version, "2024-11-05");
        assert_eq!(init.client_info.name, "mcpx");
        assert!(init.capabilities.experimental.is_empty());
    }

    #[tokio::test]
    async fn test_remote_bootstrap_starts_first() {
        let mock = Arc::new(MockTransport::remote());
        let session = session(mock.clone());

        session.bootstrap(client_info()).await.unwrap();
        assert_eq!(mock.starts(), 1);
    }

    #[tokio::test]
    async fn test_initialize_before_start_is_rejected() {
        let mock = Arc::new(MockTransport::new(TransportKind::StreamableHttp));
        let session = session(mock.clone());

        let err = session.initialize(client_info()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Handshake { .. }));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(mock.last_initialize().is_none());
    }

    #[tokio::test]
    async fn test_start_failure() {
        let mock = Arc::new(MockTransport::remote());
        mock.fail_start(BackendError::Transport("refused".into()));
        let session = session(mock);

        let err = session.bootstrap(client_info()).await.unwrap_err();
        assert!(matches!(err, ProxyError::TransportConstruction { .. }));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_handshake_failure() {
        let mock = Arc::new(MockTransport::local());
        mock.fail_initialize(BackendError::Closed);
        let session = session(mock);

        let err = session.bootstrap(client_info()).await.unwrap_err();
        assert_eq!(err.backend(), Some("test"));
        assert!(matches!(err, ProxyError::Handshake { .. }));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = Arc::new(MockTransport::local());
        mock.push_tool_page(Page::last(vec![Tool::new("a")]));
        let session = session(mock.clone());
        session.bootstrap(client_info()).await.unwrap();

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(mock.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_pings_until_cancelled() {
        let mock = Arc::new(MockTransport::remote());
        mock.fail_ping(BackendError::Timeout);
        let session = session(mock.clone());
        session.bootstrap(client_info()).await.unwrap();

        let cancel = CancellationToken::new();
        session.start_keepalive(cancel.clone(), KEEPALIVE_INTERVAL);
        assert!(session.keepalive_running());

        // No ping before the first interval has elapsed
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(mock.pings(), 0);

        // Failed pings do not stop the loop
        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(mock.pings(), 3);

        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!session.keepalive_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(mock.pings(), 3);
    }

    #[tokio::test]
    async fn test_no_keepalive_for_local_backends() {
        let mock = Arc::new(MockTransport::local());
        let session = session(mock);
        session.bootstrap(client_info()).await.unwrap();

        session.start_keepalive(CancellationToken::new(), KEEPALIVE_INTERVAL);
        assert!(!session.keepalive_running());
    }
}
