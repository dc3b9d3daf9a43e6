//! Per-mount handler state

use std::collections::HashMap;
use std::sync::Arc;

use mcpx_core::JsonRpcResponse;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::server::McpServer;

/// Open SSE sessions of one mount, by session id
#[derive(Debug, Default)]
pub struct SseSessions {
    sessions: Mutex<HashMap<Uuid, mpsc::UnboundedSender<JsonRpcResponse>>>,
}

impl SseSessions {
    /// Register a new session and return its id and outbound queue
    pub fn open(&self) -> (Uuid, mpsc::UnboundedReceiver<JsonRpcResponse>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().insert(id, tx);
        (id, rx)
    }

    pub fn sender(&self, id: &Uuid) -> Option<mpsc::UnboundedSender<JsonRpcResponse>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) {
        self.sessions.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared state for one mount's handlers
#[derive(Clone)]
pub struct MountState {
    pub server: Arc<McpServer>,
    pub sessions: Arc<SseSessions>,
    /// Absolute message endpoint announced to SSE clients
    pub message_url: String,
    /// Fires on shutdown; open streams end when it does
    pub cancel: CancellationToken,
}
