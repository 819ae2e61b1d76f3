//! Live sessions with MCP tool providers over child-process stdio.
//!
//! Each [`StdioToolConnection`] owns one provider subprocess. A background
//! reader task owns the child's stdout exclusively and routes every
//! newline-delimited JSON-RPC frame: responses are matched to the waiting
//! request through a `oneshot` channel keyed by request id, server-initiated
//! requests are refused, and notifications are logged.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::error::{BotError, Result};

use super::protocol::{
    CallToolResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    MessageKind, ToolDescriptor, classify_message, initialize_params,
};
use super::registry::ToolProviderSpec;

/// Upper bound on a single request so a wedged provider cannot hold a chat forever.
const TOOL_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace period for a provider to exit after its stdin is closed.
const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type SharedWriter = Arc<Mutex<Option<ChildStdin>>>;

/// One live session with a tool provider.
#[async_trait]
pub trait ToolConnection: Send + Sync {
    /// Name of the provider spec this connection was opened from.
    fn provider(&self) -> &str;

    /// Tools advertised by the provider during the handshake.
    fn tools(&self) -> &[ToolDescriptor];

    async fn call_tool(&self, name: &str, arguments: serde_json::Value)
    -> Result<CallToolResult>;

    /// Closes the session. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Opens connections for provider specs.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self, spec: &ToolProviderSpec) -> Result<Arc<dyn ToolConnection>>;
}

/// Launches providers as child processes speaking MCP over stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioConnector;

#[async_trait]
impl ToolConnector for StdioConnector {
    async fn connect(&self, spec: &ToolProviderSpec) -> Result<Arc<dyn ToolConnection>> {
        let connection = StdioToolConnection::spawn(spec).await?;
        Ok(Arc::new(connection))
    }
}

pub struct StdioToolConnection {
    provider: String,
    tools: Vec<ToolDescriptor>,
    writer: SharedWriter,
    pending: PendingMap,
    next_id: AtomicU64,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StdioToolConnection {
    /// Spawns the provider, performs the MCP handshake and lists its tools.
    pub async fn spawn(spec: &ToolProviderSpec) -> Result<Self> {
        info!(
            "Launching tool provider '{}': {} {}",
            spec.name,
            spec.command,
            spec.args.join(" ")
        );

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(env) = &spec.env {
            command.envs(env);
        }

        let connect_error = |message: String| BotError::ToolConnect {
            provider: spec.name.clone(),
            message,
        };

        let mut child = command.spawn().map_err(|e| connect_error(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connect_error("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connect_error("stdout not captured".to_string()))?;

        let writer: SharedWriter = Arc::new(Mutex::new(Some(stdin)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader = tokio::spawn(reader_loop(
            spec.name.clone(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&writer),
        ));

        let mut connection = Self {
            provider: spec.name.clone(),
            tools: Vec::new(),
            writer,
            pending,
            next_id: AtomicU64::new(1),
            child: Mutex::new(Some(child)),
            reader: Mutex::new(Some(reader)),
        };

        match connection.handshake().await {
            Ok(tools) => {
                info!(
                    "Tool provider '{}' ready with {} tools",
                    spec.name,
                    tools.len()
                );
                connection.tools = tools;
                Ok(connection)
            }
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(
                        "Failed to stop tool provider '{}' after handshake error: {close_err}",
                        spec.name
                    );
                }
                Err(connect_error(e.to_string()))
            }
        }
    }

    async fn handshake(&self) -> Result<Vec<ToolDescriptor>> {
        let init = self.request("initialize", Some(initialize_params())).await?;
        self.expect_result("initialize", init)?;
        self.notify(&JsonRpcNotification::new("notifications/initialized"))
            .await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.map(|c| serde_json::json!({ "cursor": c }));
            let response = self.request("tools/list", params).await?;
            let page: ListToolsResult =
                serde_json::from_value(self.expect_result("tools/list", response)?)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    fn protocol_error(&self, message: impl Into<String>) -> BotError {
        BotError::ToolProtocol {
            provider: self.provider.clone(),
            message: message.into(),
        }
    }

    fn expect_result(&self, method: &str, response: JsonRpcResponse) -> Result<serde_json::Value> {
        if let Some(err) = response.error {
            return Err(self.protocol_error(format!(
                "{method} failed (code {}): {}",
                err.code, err.message
            )));
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    async fn write_frame(&self, frame: &impl serde::Serialize) -> Result<()> {
        let line = serde_json::to_string(frame)?;
        write_line(&self.writer, &line)
            .await
            .map_err(|e| self.protocol_error(e.to_string()))
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        self.write_frame(notification).await
    }

    /// Sends a request and waits for the correlated response.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        trace!("-> {} #{id} {method}", self.provider);
        if let Err(e) = self
            .write_frame(&JsonRpcRequest::new(id, method, params))
            .await
        {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(TOOL_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(self.protocol_error(format!(
                "connection closed while waiting for {method}"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(self.protocol_error(format!("timed out waiting for {method}")))
            }
        }
    }
}

#[async_trait]
impl ToolConnection for StdioToolConnection {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult> {
        debug!("Calling tool '{name}' on provider '{}'", self.provider);
        let response = self
            .request(
                "tools/call",
                Some(serde_json::json!({ "name": name, "arguments": arguments })),
            )
            .await?;

        if let Some(err) = response.error {
            return Err(BotError::ToolInvocation {
                tool: name.to_string(),
                message: format!("code {}: {}", err.code, err.message),
            });
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    async fn close(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        debug!("Closing tool provider '{}'", self.provider);

        // Dropping stdin is the MCP stdio shutdown signal.
        self.writer.lock().await.take();

        let outcome = match tokio::time::timeout(EXIT_GRACE_PERIOD, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Tool provider '{}' exited with {status}", self.provider);
                Ok(())
            }
            Ok(Err(e)) => Err(BotError::Io(e)),
            Err(_) => {
                warn!(
                    "Tool provider '{}' did not exit within {:?}, killing it",
                    self.provider, EXIT_GRACE_PERIOD
                );
                child.kill().await.map_err(BotError::Io)
            }
        };

        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        self.pending.lock().await.clear();

        outcome
    }
}

async fn write_line(writer: &SharedWriter, line: &str) -> std::io::Result<()> {
    let mut guard = writer.lock().await;
    let stdin = guard.as_mut().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection closed")
    })?;
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

async fn reader_loop(
    provider: String,
    stdout: ChildStdout,
    pending: PendingMap,
    writer: SharedWriter,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Tool provider '{provider}' closed its stdout");
                break;
            }
            Err(e) => {
                warn!("Failed reading from tool provider '{provider}': {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: serde_json::Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Ignoring non-JSON output from '{provider}': {e}");
                continue;
            }
        };

        match classify_message(&frame) {
            MessageKind::Response(id) => {
                let sender = pending.lock().await.remove(&id);
                match (sender, serde_json::from_value::<JsonRpcResponse>(frame)) {
                    (Some(sender), Ok(response)) => {
                        let _ = sender.send(response);
                    }
                    (Some(_), Err(e)) => {
                        warn!("Malformed response #{id} from '{provider}': {e}");
                    }
                    (None, _) => debug!("No pending request #{id} for '{provider}'"),
                }
            }
            MessageKind::IncomingRequest(id) => {
                debug!("Refusing server-initiated request from '{provider}'");
                let refusal = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "Method not supported by client"}
                });
                if let Err(e) = write_line(&writer, &refusal.to_string()).await {
                    debug!("Could not refuse request from '{provider}': {e}");
                }
            }
            MessageKind::UnmatchedError => {
                warn!("Tool provider '{provider}' sent an error without a request id: {line}");
                fail_oldest_pending(&provider, &pending, frame).await;
            }
            MessageKind::Notification => trace!("<- {provider} notification: {line}"),
        }
    }

    // Wake every waiter with a closed-channel error.
    pending.lock().await.clear();
}

/// Hands an unattributed error to the longest-waiting request.
async fn fail_oldest_pending(provider: &str, pending: &PendingMap, frame: serde_json::Value) {
    let response = match serde_json::from_value::<JsonRpcResponse>(frame) {
        Ok(response) => response,
        Err(e) => {
            warn!("Malformed error frame from '{provider}': {e}");
            return;
        }
    };
    let mut pending = pending.lock().await;
    let Some(&oldest) = pending.keys().min() else {
        return;
    };
    if let Some(sender) = pending.remove(&oldest) {
        debug!("Failing request #{oldest} on '{provider}' with the unattributed error");
        let _ = sender.send(response);
    }
}
