use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};

use crate::mcp::RemoteTool;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// One external tool server: a child process speaking line-delimited
/// JSON-RPC 2.0 over its standard streams. Requests are serialised by the
/// stdin mutex and correlated by monotonically increasing ids.
#[derive(Debug)]
pub struct McpClient {
    server_name: String,
    child: Child,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl McpClient {
    pub async fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                anyhow!(
                    "failed to spawn tool server '{}' (command='{}', args={:?}): {}",
                    name,
                    command,
                    args,
                    e
                )
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open stdin for tool server '{name}'"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to open stdout for tool server '{name}'"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to open stderr for tool server '{name}'"))?;

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let Some(id) = msg.get("id").and_then(|v| v.as_u64()) else {
                    continue;
                };
                let tx = {
                    let mut map = pending_reader.lock().await;
                    map.remove(&id)
                };
                if let Some(tx) = tx {
                    let _ = tx.send(msg);
                }
            }
        });
        // Keep the child's stderr drained so it cannot block on a full pipe.
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(_line)) = reader.next_line().await {}
        });

        Ok(Self {
            server_name: name.to_string(),
            child,
            stdin: Arc::new(Mutex::new(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "hearth", "version": env!("CARGO_PKG_VERSION") }
        });
        let _ = self.call("initialize", params, INIT_TIMEOUT).await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> anyhow::Result<Vec<RemoteTool>> {
        let result = self.call("tools/list", json!({}), self.timeout).await?;
        let tools_value = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        let tools: Vec<RemoteTool> =
            serde_json::from_value(tools_value).context("failed to parse tools/list result")?;
        Ok(tools)
    }

    /// Invokes a remote tool and returns the concatenation of all
    /// `text`-typed entries in the response's content array.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<String> {
        let result = self
            .call(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
                self.timeout,
            )
            .await?;
        let mut output = String::new();
        if let Some(parts) = result.get("content").and_then(|v| v.as_array()) {
            for part in parts {
                if part.get("type").and_then(|v| v.as_str()) == Some("text") {
                    if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                        output.push_str(text);
                    }
                }
            }
        }
        Ok(output)
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let line = serde_json::to_string(&request)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }
        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(format!("{line}\n").as_bytes())
                .await
                .context("failed to write tool server request")?;
            stdin
                .flush()
                .await
                .context("failed to flush tool server request")?;
        }

        let msg = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) => {
                let mut map = self.pending.lock().await;
                map.remove(&id);
                return Err(anyhow!(
                    "tool server '{}' closed while awaiting '{}'",
                    self.server_name,
                    method
                ));
            }
            Err(_) => {
                let mut map = self.pending.lock().await;
                map.remove(&id);
                return Err(anyhow!(
                    "tool server '{}' timed out on '{}'",
                    self.server_name,
                    method
                ));
            }
        };

        if let Some(err) = msg.get("error") {
            let code = err.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(anyhow!("RPC error {code} on '{method}': {message}"));
        }
        Ok(msg.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Closes stdin, kills the process and reaps it.
    pub async fn close(&mut self) {
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}
