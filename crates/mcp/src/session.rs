use crate::protocol::{
    self, CallToolResult, Incoming, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult,
};
use async_trait::async_trait;
use meshloop_config::McpConfig;
use meshloop_core::error::TransportError;
use meshloop_core::tool::{ToolDescriptor, ToolExecutionError, ToolOutcome, ToolTransport};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

type BoxedReader = BufReader<Box<dyn AsyncRead + Unpin + Send>>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// How long `close` waits for the child to exit after its stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// A stdio session with one MCP tool provider.
pub struct McpSession {
    label: String,
    reader: BoxedReader,
    writer: Option<BoxedWriter>,
    child: Option<Child>,
    next_id: u64,
    call_timeout: Duration,
    initialized: bool,
}

impl McpSession {
    /// Spawn the provider process described by `config`.
    ///
    /// The child is killed if the session is dropped without `close`.
    pub fn spawn(config: &McpConfig) -> Result<Self, TransportError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| TransportError::Spawn {
            command: config.command.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| TransportError::Spawn {
            command: config.command.clone(),
            reason: "stdin not captured".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            command: config.command.clone(),
            reason: "stdout not captured".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let label = config.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(provider = %label, "{line}");
                }
            });
        }

        info!(
            command = %config.command,
            args = ?config.args,
            pid = child.id(),
            "Spawned tool provider"
        );

        let mut session = Self::from_streams(stdout, stdin, config.call_timeout());
        session.label = config.command.clone();
        session.child = Some(child);
        Ok(session)
    }

    /// Build a session over arbitrary streams, with no child process.
    pub fn from_streams<R, W>(reader: R, writer: W, call_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            label: "stream".into(),
            reader: BufReader::new(Box::new(reader)),
            writer: Some(Box::new(writer)),
            child: None,
            next_id: 1,
            call_timeout,
            initialized: false,
        }
    }

    async fn write_line(&mut self, value: &impl serde::Serialize) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::ConnectionClosed)?;
        let mut line =
            serde_json::to_string(value).map_err(|e| TransportError::Decode(e.to_string()))?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await.map_err(closed_or_io)?;
        writer.flush().await.map_err(closed_or_io)?;
        Ok(())
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.write_line(&JsonRpcNotification::new(method, params)).await
    }

    /// Send a request and wait, within the call timeout, for its response.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id;
        self.next_id += 1;

        debug!(provider = %self.label, id, method, "MCP request");
        self.write_line(&JsonRpcRequest::new(id, method, params)).await?;

        let timeout = self.call_timeout;
        match tokio::time::timeout(timeout, self.read_response(id, method)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                method: method.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Read lines until the response for `id` arrives.
    ///
    /// Notifications are dropped; server requests get a method-not-found reply.
    async fn read_response(&mut self, id: u64, method: &str) -> Result<Value, TransportError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(TransportError::ConnectionClosed);
            }
            if line.trim().is_empty() {
                continue;
            }

            match Incoming::parse(&line) {
                Ok(Incoming::Response { id: rid, outcome }) if rid.as_u64() == Some(id) => {
                    return outcome.map_err(|e| TransportError::Rpc {
                        method: method.to_string(),
                        code: e.code,
                        message: e.message,
                    });
                }
                Ok(Incoming::Response { id: rid, .. }) => {
                    debug!(expected = id, received = %rid, "Dropping stale MCP response");
                }
                Ok(Incoming::Notification { method }) => {
                    debug!(provider = %self.label, %method, "MCP notification ignored");
                }
                Ok(Incoming::Request { id: rid, method }) => {
                    debug!(provider = %self.label, %method, "Declining server request");
                    self.write_line(&protocol::method_not_found(rid, &method)).await?;
                }
                Err(e) => {
                    warn!(provider = %self.label, error = %e, "Skipping unreadable line");
                }
            }
        }
    }

    async fn ensure_initialized(&mut self) -> Result<(), TransportError> {
        if self.initialized {
            Ok(())
        } else {
            self.initialize().await
        }
    }
}

/// A broken pipe means the provider went away.
fn closed_or_io(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::BrokenPipe {
        TransportError::ConnectionClosed
    } else {
        TransportError::Io(e)
    }
}

#[async_trait]
impl ToolTransport for McpSession {
    async fn initialize(&mut self) -> Result<(), TransportError> {
        if self.initialized {
            return Ok(());
        }

        let result = self
            .request("initialize", Some(protocol::initialize_params()))
            .await
            .map_err(|e| match e {
                TransportError::Rpc { code, message, .. } => {
                    TransportError::Handshake(format!("{message} (code {code})"))
                }
                other => other,
            })?;

        let info: InitializeResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Handshake(format!("bad initialize result: {e}")))?;
        info!(
            provider = %self.label,
            server = info.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            protocol_version = info.protocol_version.as_deref().unwrap_or("unspecified"),
            "Tool provider initialized"
        );

        self.notify("notifications/initialized", None).await?;
        self.initialized = true;
        Ok(())
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, TransportError> {
        self.ensure_initialized().await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = serde_json::from_value(self.request("tools/list", params).await?)
                .map_err(|e| TransportError::Decode(format!("bad tools/list result: {e}")))?;

            tools.extend(page.tools.into_iter().map(ToolDescriptor::from));

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        debug!(provider = %self.label, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolOutcome, TransportError> {
        self.ensure_initialized().await?;

        let params = json!({ "name": name, "arguments": arguments });
        let raw = match self.request("tools/call", Some(params)).await {
            Ok(raw) => raw,
            Err(TransportError::Rpc { message, code, .. }) => {
                warn!(tool = name, code, %message, "Tool call rejected by provider");
                return Ok(ToolOutcome::Failure(ToolExecutionError {
                    tool_name: name.to_string(),
                    message,
                }));
            }
            Err(e) => return Err(e),
        };

        let result: CallToolResult = serde_json::from_value(raw)
            .map_err(|e| TransportError::Decode(format!("bad tools/call result: {e}")))?;

        if result.is_error == Some(true) {
            let message = result.texts().collect::<Vec<_>>().join("\n");
            let message = if message.is_empty() {
                "tool reported an error".to_string()
            } else {
                message
            };
            return Ok(ToolOutcome::Failure(ToolExecutionError {
                tool_name: name.to_string(),
                message,
            }));
        }

        Ok(ToolOutcome::Success(result.into_value()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        // EOF on stdin asks the provider to exit
        let _ = writer.shutdown().await;
        drop(writer);

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(provider = %self.label, %status, "Tool provider exited"),
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_) => {
                    warn!(provider = %self.label, "Tool provider did not exit, killing");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}
