//! Stdio transport: a spawned child process speaking newline-delimited JSON
//!
//! The process is spawned at construction, so the transport is live without
//! an explicit start. Each stdout line is one JSON-RPC message; stderr is
//! relayed to the log.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcpx_core::config::LocalSpec;
use mcpx_core::{BackendResult, BackendTransport, JsonRpcNotification};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::rpc::RpcClient;

/// How long a child gets to exit on its own after stdin closes
const EXIT_GRACE: Duration = Duration::from_secs(2);

type SharedStdin = Arc<tokio::sync::Mutex<Option<ChildStdin>>>;

pub struct StdioTransport {
    name: String,
    rpc: Arc<RpcClient>,
    stdin: SharedStdin,
    child: tokio::sync::Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the backend process and start reading its output
    pub fn spawn(name: &str, spec: &LocalSpec, timeout: Duration) -> Result<Self, TransportError> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::SpawnFailed(format!("{}: {}", spec.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = child.stderr.take();

        info!(backend = %name, command = %spec.command, pid = ?child.id(), "Spawned backend process");

        let rpc = Arc::new(RpcClient::new(name, timeout));
        let stdin: SharedStdin = Arc::new(tokio::sync::Mutex::new(Some(stdin)));
        let mut tasks = Vec::new();

        // stdout: one JSON-RPC message per line
        {
            let rpc = rpc.clone();
            let stdin = stdin.clone();
            let name = name.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if let Some(reply) = rpc.handle_text(line) {
                                if let Err(e) = write_line(&stdin, &reply).await {
                                    warn!(backend = %name, error = %e, "Failed to answer backend request");
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(backend = %name, error = %e, "Failed to read backend output");
                            break;
                        }
                    }
                }
                debug!(backend = %name, "Backend output closed");
                rpc.fail_all();
            }));
        }

        if let Some(stderr) = stderr {
            let name = name.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(backend = %name, "stderr: {}", line);
                }
            }));
        }

        Ok(Self {
            name: name.to_string(),
            rpc,
            stdin,
            child: tokio::sync::Mutex::new(Some(child)),
            tasks: Mutex::new(tasks),
        })
    }
}

async fn write_line<T: Serialize>(stdin: &SharedStdin, message: &T) -> Result<(), TransportError> {
    let mut line =
        serde_json::to_vec(message).map_err(|e| TransportError::SendFailed(e.to_string()))?;
    line.push(b'\n');

    let mut guard = stdin.lock().await;
    let pipe = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;
    pipe.write_all(&line)
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    pipe.flush()
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

#[async_trait]
impl BackendTransport for StdioTransport {
    async fn start(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> BackendResult<Value> {
        let (id, request) = self.rpc.next_request(method, params);
        let pending = self.rpc.register(id);
        write_line(&self.stdin, &request).await?;
        pending.wait().await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> BackendResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        write_line(&self.stdin, &notification).await?;
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        // Closing stdin asks the process to exit
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(backend = %self.name, %status, "Backend process exited"),
            Ok(Err(e)) => warn!(backend = %self.name, error = %e, "Failed to wait for backend process"),
            Err(_) => {
                debug!(backend = %self.name, "Backend process did not exit, killing");
                if let Err(e) = child.kill().await {
                    warn!(backend = %self.name, error = %e, "Failed to kill backend process");
                    result = Err(TransportError::SendFailed(format!("kill failed: {}", e)).into());
                }
            }
        }

        // Reader tasks and waiters are released whatever happened to the child
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.rpc.fail_all();
        result
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
