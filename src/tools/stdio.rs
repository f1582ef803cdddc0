//! Tool server spoken to over a child process's stdio.
//!
//! Newline-delimited JSON-RPC 2.0: `initialize`, the `notifications/initialized`
//! notification, then `tools/list` and `tools/call`. The child's stderr is
//! collected in the background and attached to attempt failures as
//! diagnostics.

use crate::error::{HarkError, Result};
use crate::tools::{AttemptError, ToolConnection, ToolConnector, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound on retained stderr, in bytes.
const MAX_DIAGNOSTICS: usize = 8 * 1024;

/// How long to wait for the child's stderr to flush after a failure.
const STDERR_GRACE: Duration = Duration::from_millis(250);

/// Spawns the configured command and performs the handshake.
#[derive(Debug, Clone)]
pub struct StdioToolConnector {
    command: String,
    args: Vec<String>,
    /// Stderr of the latest attempt, kept until someone asks for it.
    last_stderr: Arc<Mutex<Option<StderrCollector>>>,
}

impl StdioToolConnector {
    /// Connector for `command args...`.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            last_stderr: Arc::new(Mutex::new(None)),
        }
    }

    fn take_collector(&self) -> Option<StderrCollector> {
        self.last_stderr.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl ToolConnector for StdioToolConnector {
    async fn connect(&self) -> std::result::Result<Arc<dyn ToolConnection>, AttemptError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AttemptError::new(format!("failed to spawn '{}': {e}", self.command)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(AttemptError::new("child stdio not captured"));
        };

        // Parked before the handshake so a timed-out attempt still leaves it behind.
        if let Ok(mut slot) = self.last_stderr.lock() {
            *slot = Some(StderrCollector::spawn(child.stderr.take()));
        }

        let mut rpc = RpcChannel {
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
        };

        if let Err(e) = handshake(&mut rpc).await {
            let _ = child.start_kill();
            let diagnostics = match self.take_collector() {
                Some(collector) => collector.finish().await,
                None => None,
            };
            return Err(AttemptError {
                message: e.to_string(),
                diagnostics,
            });
        }

        info!("tool server '{}' initialized", self.command);
        Ok(Arc::new(StdioConnection {
            rpc: tokio::sync::Mutex::new(rpc),
            _child: child,
        }))
    }

    async fn take_diagnostics(&self) -> Option<String> {
        self.take_collector()?.finish().await
    }
}

/// Background reader of a child's stderr.
#[derive(Debug)]
struct StderrCollector {
    text: Arc<Mutex<String>>,
    task: Option<JoinHandle<()>>,
}

impl StderrCollector {
    fn spawn(stderr: Option<ChildStderr>) -> Self {
        let text = Arc::new(Mutex::new(String::new()));
        let task = stderr.map(|stderr| {
            let sink = Arc::clone(&text);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("tool server: {line}");
                    if let Ok(mut buf) = sink.lock()
                        && buf.len() < MAX_DIAGNOSTICS
                    {
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
            })
        });
        Self { text, task }
    }

    /// Give the child a moment to finish writing, then return what it said.
    async fn finish(self) -> Option<String> {
        if let Some(task) = self.task {
            let _ = tokio::time::timeout(STDERR_GRACE, task).await;
        }
        let text = self.text.lock().map(|b| b.clone()).unwrap_or_default();
        (!text.trim().is_empty()).then_some(text)
    }
}

async fn handshake(rpc: &mut RpcChannel) -> Result<()> {
    let result = rpc
        .request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "hark", "version": env!("CARGO_PKG_VERSION")},
            }),
        )
        .await?;
    if let Some(name) = result.pointer("/serverInfo/name").and_then(Value::as_str) {
        debug!("tool server identifies as {name}");
    }
    rpc.notify("notifications/initialized", json!({})).await
}

/// A live stdio session. Dropping it kills the child.
pub struct StdioConnection {
    rpc: tokio::sync::Mutex<RpcChannel>,
    _child: Child,
}

#[async_trait]
impl ToolConnection for StdioConnection {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.rpc.lock().await.request("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(tools)?)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .rpc
            .lock()
            .await
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        let text = content_text(&result);
        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return Err(HarkError::Tool(format!("{name}: {text}")));
        }
        Ok(text)
    }
}

/// Join the text parts of a `tools/call` result.
fn content_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

struct RpcChannel {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl RpcChannel {
    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await?;

        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| HarkError::Tool(format!("{method}: tool server closed stdout")))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let msg: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    debug!("ignoring non-JSON line from tool server: {e}");
                    continue;
                }
            };
            // Notifications and server-initiated requests are not ours.
            if msg.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(err) = msg.get("error") {
                let text = err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(HarkError::Tool(format!("{method}: {text}")));
            }
            return Ok(msg.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    async fn send(&mut self, msg: &Value) -> Result<()> {
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }
}
