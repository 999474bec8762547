//! One launched tool-provider subprocess.
//!
//! The child communicates over newline-delimited JSON-RPC on stdin/stdout;
//! stderr is inherited so provider diagnostics land in the terminal. A
//! reader task pumps stdout, matching responses to in-flight requests by id
//! and answering provider-initiated `sampling/complete` requests through
//! the registered [`SamplingHandler`].

use crate::protocol::{self, CallResult, Incoming, RpcError, ToolSpec};
use async_trait::async_trait;
use quill_config::ToolProviderConfig;
use quill_core::{ProviderError, ToolDefinition, ToolError};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Answers `sampling/complete` requests from tool providers.
///
/// A provider may itself need a model completion mid-call; the session
/// plumbs its chat client through this seam so providers never hold their
/// own credentials.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn complete(&self, prompt: String) -> Result<String, ProviderError>;
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>;

/// A connected tool-provider subprocess and its advertised tools.
pub struct ToolProvider {
    name: String,
    child: tokio::sync::Mutex<Option<Child>>,
    outgoing: mpsc::UnboundedSender<String>,
    pending: std::sync::Arc<PendingMap>,
    next_id: AtomicU64,
    tools: Vec<ToolDefinition>,
}

impl ToolProvider {
    /// Spawn the configured provider, run the handshake, and fetch its
    /// tool list.
    pub async fn launch(
        config: &ToolProviderConfig,
        sampling: std::sync::Arc<dyn SamplingHandler>,
    ) -> Result<Self, ToolError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Handshake {
                provider: config.name.clone(),
                reason: format!("failed to spawn '{}': {e}", config.command),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| ToolError::Handshake {
            provider: config.name.clone(),
            reason: "child stdin unavailable".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ToolError::Handshake {
            provider: config.name.clone(),
            reason: "child stdout unavailable".into(),
        })?;

        // Writer task: the single owner of stdin.
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = outgoing_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let pending: std::sync::Arc<PendingMap> = Default::default();

        // Reader task: pumps stdout until the pipe closes.
        {
            let pending = pending.clone();
            let outgoing = outgoing.clone();
            let provider_name = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match protocol::parse_incoming(&line) {
                        Ok(Incoming::Response { id, result }) => {
                            let sender = pending.lock().unwrap().remove(&id);
                            match sender {
                                Some(tx) => {
                                    let _ = tx.send(result);
                                }
                                None => warn!(
                                    provider = %provider_name,
                                    id,
                                    "Response for unknown request id"
                                ),
                            }
                        }
                        Ok(Incoming::Request { id, method, params }) => {
                            Self::handle_provider_request(
                                &provider_name,
                                id,
                                &method,
                                params,
                                &outgoing,
                                &sampling,
                            );
                        }
                        Ok(Incoming::Notification { method, .. }) => {
                            debug!(provider = %provider_name, method, "Provider notification");
                        }
                        Err(e) => {
                            warn!(provider = %provider_name, error = %e, "Skipping unparseable provider output");
                        }
                    }
                }
                debug!(provider = %provider_name, "Provider stdout closed");
                // Fail anything still waiting.
                pending.lock().unwrap().clear();
            });
        }

        let mut provider = Self {
            name: config.name.clone(),
            child: tokio::sync::Mutex::new(Some(child)),
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            tools: Vec::new(),
        };

        provider
            .request(
                "initialize",
                json!({
                    "client": "quill",
                    "version": env!("CARGO_PKG_VERSION"),
                    "capabilities": { "sampling": true },
                }),
                HANDSHAKE_TIMEOUT,
            )
            .await
            .map_err(|e| ToolError::Handshake {
                provider: config.name.clone(),
                reason: e.to_string(),
            })?;

        let listing = provider
            .request("tools/list", json!({}), HANDSHAKE_TIMEOUT)
            .await
            .map_err(|e| ToolError::Handshake {
                provider: config.name.clone(),
                reason: format!("tools/list failed: {e}"),
            })?;

        let specs: Vec<ToolSpec> = serde_json::from_value(
            listing.get("tools").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| ToolError::Handshake {
            provider: config.name.clone(),
            reason: format!("malformed tools/list result: {e}"),
        })?;

        provider.tools = specs.into_iter().map(Into::into).collect();
        debug!(provider = %provider.name, tools = provider.tools.len(), "Provider connected");
        Ok(provider)
    }

    /// Answer a provider-initiated request without blocking the read pump.
    fn handle_provider_request(
        provider_name: &str,
        id: u64,
        method: &str,
        params: Value,
        outgoing: &mpsc::UnboundedSender<String>,
        sampling: &std::sync::Arc<dyn SamplingHandler>,
    ) {
        match method {
            "sampling/complete" => {
                let prompt = params
                    .get("prompt")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let outgoing = outgoing.clone();
                let sampling = sampling.clone();
                let provider_name = provider_name.to_string();
                tokio::spawn(async move {
                    let line = match sampling.complete(prompt).await {
                        Ok(text) => protocol::response_line(id, json!({ "text": text })),
                        Err(e) => {
                            warn!(provider = %provider_name, error = %e, "Sampling request failed");
                            protocol::error_line(id, -32603, &e.to_string())
                        }
                    };
                    let _ = outgoing.send(line);
                });
            }
            other => {
                warn!(provider = %provider_name, method = other, "Unsupported provider request");
                let _ = outgoing.send(protocol::error_line(
                    id,
                    -32601,
                    &format!("unsupported method: {other}"),
                ));
            }
        }
    }

    /// The provider's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tools this provider advertised during the handshake.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Execute one tool call on this provider.
    pub async fn call(&self, tool: &str, arguments: Value) -> Result<CallResult, ToolError> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": tool, "arguments": arguments }),
                CALL_TIMEOUT,
            )
            .await?;

        serde_json::from_value(result)
            .map_err(|e| ToolError::Protocol(format!("malformed tools/call result: {e}")))
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let line = protocol::request_line(id, method, params);
        if self.outgoing.send(line).is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(ToolError::ProviderUnavailable(self.name.clone()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(rpc))) => Err(ToolError::Protocol(format!(
                "{} answered {method} with error {}: {}",
                self.name, rpc.code, rpc.message
            ))),
            Ok(Err(_)) => Err(ToolError::ProviderUnavailable(self.name.clone())),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(ToolError::Protocol(format!(
                    "timed out waiting for {method} from {}",
                    self.name
                )))
            }
        }
    }

    /// Terminate the subprocess. Idempotent; safe to call on a provider
    /// whose child already exited.
    pub async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.start_kill() {
                debug!(provider = %self.name, error = %e, "Provider already gone");
            }
            let _ = child.wait().await;
            debug!(provider = %self.name, "Provider terminated");
        }
    }
}
