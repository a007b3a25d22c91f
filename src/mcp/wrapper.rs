use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::McpServerConfig;
use crate::mcp::client::McpClient;
use crate::mcp::RemoteTool;
use crate::tools::{Tool, ToolError};
use crate::types::ArgMap;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Exposes one remote tool under a collision-proof local name. The wrapper
/// forwards calls with the server's original tool name.
pub struct McpToolWrapper {
    client: Arc<McpClient>,
    remote: RemoteTool,
    full_name: String,
    annotated_description: String,
}

impl McpToolWrapper {
    pub fn new(client: Arc<McpClient>, remote: RemoteTool) -> Self {
        let full_name = format!("ext_{}_{}", client.server_name(), remote.name);
        let annotated_description =
            format!("[ext: {}] {}", client.server_name(), remote.description);
        Self {
            client,
            remote,
            full_name,
            annotated_description,
        }
    }
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> String {
        self.full_name.clone()
    }

    fn description(&self) -> String {
        self.annotated_description.clone()
    }

    fn parameters(&self) -> Value {
        self.remote
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({"type": "object"}))
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        self.client
            .call_tool(&self.remote.name, Value::Object(args.clone()))
            .await
            .map_err(|e| {
                let message = e.to_string();
                // A connection torn down mid-request means the call was
                // cancelled by shutdown, not refused by the server.
                if message.contains("closed while awaiting") {
                    ToolError::Cancelled
                } else {
                    ToolError::ExternalServer {
                        server: self.client.server_name().to_string(),
                        message,
                    }
                }
            })
    }
}

/// The set of connected external tool servers. Each server's transport is
/// serialised internally; calls to different servers proceed in parallel.
#[derive(Default)]
pub struct McpServerSet {
    clients: Vec<Arc<McpClient>>,
}

impl McpServerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns one server, performs the handshake and returns wrappers for
    /// every tool it advertises.
    pub async fn connect(
        &mut self,
        config: &McpServerConfig,
    ) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        let client = McpClient::spawn(&config.name, &config.command, &config.args, CALL_TIMEOUT)
            .await?;
        client.initialize().await?;
        let remote_tools = client.list_tools().await?;
        let client = Arc::new(client);
        let wrappers = remote_tools
            .into_iter()
            .map(|remote| {
                Arc::new(McpToolWrapper::new(Arc::clone(&client), remote)) as Arc<dyn Tool>
            })
            .collect();
        self.clients.push(client);
        Ok(wrappers)
    }

    pub fn server_names(&self) -> Vec<String> {
        self.clients
            .iter()
            .map(|c| c.server_name().to_string())
            .collect()
    }
}
