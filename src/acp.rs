use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::agent::Agent;
use crate::config::ConfigStore;
use crate::ollama::ModelBackend;
use crate::tools::Registry;
use crate::types::ArgMap;

pub const PROTOCOL_VERSION: &str = "0.1.0";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const APPLICATION_ERROR: i64 = -32000;

/// Line-delimited JSON-RPC façade over the agent and registry for an
/// external editor. Permission checking in this mode is auto-approve: the
/// registry handed in is expected to be built accordingly.
pub struct AcpServer {
    backend: Arc<dyn ModelBackend>,
    store: Arc<ConfigStore>,
    registry: Registry,
    agent: Agent,
    log_file: Option<std::path::PathBuf>,
}

impl std::fmt::Debug for AcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcpServer").finish_non_exhaustive()
    }
}

impl AcpServer {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        store: Arc<ConfigStore>,
        registry: Registry,
        log_file: Option<std::path::PathBuf>,
    ) -> anyhow::Result<Self> {
        let config = store.snapshot();
        let model = config.default_model.clone();
        if model.is_empty() {
            return Err(anyhow!("no default model configured"));
        }
        let agent = build_agent(&backend, &registry, &store, &model, log_file.as_deref());
        Ok(Self {
            backend,
            store,
            registry,
            agent,
            log_file,
        })
    }

    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.context("read request line")? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line).await;
            let encoded = serde_json::to_string(&response).context("encode response")?;
            writer
                .write_all(format!("{encoded}\n").as_bytes())
                .await
                .context("write response")?;
            writer.flush().await.context("flush response")?;
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Value {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return error_response(Value::Null, PARSE_ERROR, "Parse error", json!(e.to_string()))
            }
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        match method.as_str() {
            "initialize" => self.handle_initialize(id),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tool_call(id, params).await,
            "chat" => self.handle_chat(id, params).await,
            "models/list" => self.handle_models_list(id).await,
            "models/switch" => self.handle_model_switch(id, params),
            other => error_response(id, METHOD_NOT_FOUND, "Method not found", json!(other)),
        }
    }

    fn handle_initialize(&self, id: Value) -> Value {
        result_response(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "hearth",
                    "version": env!("CARGO_PKG_VERSION")
                },
                "capabilities": { "tools": true, "chat": true }
            }),
        )
    }

    fn handle_tools_list(&self, id: Value) -> Value {
        let disabled = self.store.snapshot().disabled_tools;
        let tools: Vec<Value> = self
            .registry
            .all_filtered(&disabled)
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.parameters()
                })
            })
            .collect();
        result_response(id, json!({ "tools": tools }))
    }

    async fn handle_tool_call(&self, id: Value, params: Value) -> Value {
        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return error_response(
                id,
                INVALID_PARAMS,
                "Invalid params",
                json!("missing tool name"),
            );
        };
        let arguments: ArgMap = params
            .get("arguments")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        match self.registry.execute(name, &arguments).await {
            Ok(text) => result_response(
                id,
                json!({ "content": [{ "type": "text", "text": text }] }),
            ),
            Err(e) => error_response(
                id,
                APPLICATION_ERROR,
                "Tool execution failed",
                json!(e.to_string()),
            ),
        }
    }

    async fn handle_chat(&mut self, id: Value, params: Value) -> Value {
        let Some(message) = params.get("message").and_then(|v| v.as_str()) else {
            return error_response(id, INVALID_PARAMS, "Invalid params", json!("missing message"));
        };
        if let Some(model) = params.get("model").and_then(|v| v.as_str()) {
            if !model.is_empty() && model != self.agent.model() {
                self.agent = build_agent(
                    &self.backend,
                    &self.registry,
                    &self.store,
                    model,
                    self.log_file.as_deref(),
                );
            }
        }
        let outcome = match self.agent.chat(message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return error_response(id, APPLICATION_ERROR, "Chat failed", json!(e.to_string()))
            }
        };

        let mut content = Vec::new();
        for record in &outcome.tool_calls {
            content.push(json!({
                "type": "tool_use",
                "name": record.name,
                "input": Value::Object(record.arguments.clone())
            }));
            match &record.result {
                Ok(text) => content.push(json!({ "type": "tool_result", "text": text })),
                Err(error) => content.push(json!({ "type": "tool_result", "error": error })),
            }
        }
        if !outcome.content.is_empty() {
            content.push(json!({ "type": "text", "text": outcome.content }));
        }
        result_response(id, json!({ "content": content }))
    }

    async fn handle_models_list(&self, id: Value) -> Value {
        let models = match self.backend.list_models().await {
            Ok(models) => models,
            Err(e) => {
                return error_response(
                    id,
                    APPLICATION_ERROR,
                    "Failed to list models",
                    json!(e.to_string()),
                )
            }
        };
        let config = self.store.snapshot();
        let listed: Vec<Value> = models
            .into_iter()
            .map(|m| {
                let mut entry = json!({ "name": m.name, "size": m.size });
                if let Some(cap) = config.capability(&m.name) {
                    entry["supports_tools"] = json!(cap.supports_tools);
                    entry["tool_format"] = json!(cap.tool_call_format);
                    entry["recommended_for"] = json!(cap.recommended_for);
                }
                entry
            })
            .collect();
        result_response(
            id,
            json!({ "models": listed, "default_model": config.default_model }),
        )
    }

    fn handle_model_switch(&mut self, id: Value, params: Value) -> Value {
        let Some(model) = params.get("model").and_then(|v| v.as_str()) else {
            return error_response(id, INVALID_PARAMS, "Invalid params", json!("missing model"));
        };
        let model = model.to_string();
        self.agent = build_agent(
            &self.backend,
            &self.registry,
            &self.store,
            &model,
            self.log_file.as_deref(),
        );
        if let Err(e) = self.store.update(|c| c.default_model = model.clone()) {
            return error_response(
                id,
                APPLICATION_ERROR,
                "Failed to save config",
                json!(e.to_string()),
            );
        }
        result_response(id, json!({ "model": model }))
    }
}

fn build_agent(
    backend: &Arc<dyn ModelBackend>,
    registry: &Registry,
    store: &Arc<ConfigStore>,
    model: &str,
    log_file: Option<&std::path::Path>,
) -> Agent {
    let config = store.snapshot();
    let mut agent = Agent::new(Arc::clone(backend), registry.clone(), &config, model);
    if let Some(sink) = crate::events::file_sink(log_file) {
        agent.set_event_sink(sink);
    }
    agent.add_system_prompt(None);
    agent
}

fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: &str, data: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message, "data": data }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use tempfile::tempdir;

    use super::AcpServer;
    use crate::config::{ConfigStore, ModelCapability};
    use crate::dialect::ToolCallFormat;
    use crate::ollama::ScriptedBackend;
    use crate::tools::testutil::EchoTool;
    use crate::tools::Registry;

    fn store_with_model(dir: &std::path::Path) -> Arc<ConfigStore> {
        let store = Arc::new(ConfigStore::load_or_create(dir).expect("store"));
        store
            .update(|c| {
                c.default_model = "m".to_string();
                c.model_capabilities.insert(
                    "m".to_string(),
                    ModelCapability {
                        supports_tools: true,
                        tool_call_format: ToolCallFormat::Native,
                        recommended_for: Vec::new(),
                    },
                );
            })
            .expect("update");
        store
    }

    async fn serve(server: &mut AcpServer, requests: &[Value]) -> Vec<Value> {
        let input = requests
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        let mut output: Vec<u8> = Vec::new();
        server
            .run(input.as_bytes(), &mut output)
            .await
            .expect("serve");
        String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|l| serde_json::from_str(l).expect("response json"))
            .collect()
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let tmp = tempdir().expect("tempdir");
        let store = store_with_model(tmp.path());
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let mut server = AcpServer::new(backend, store, Registry::new(), None).expect("server");
        let responses = serve(
            &mut server,
            &[json!({"jsonrpc":"2.0","id":1,"method":"initialize"})],
        )
        .await;
        assert_eq!(responses[0]["result"]["protocolVersion"], "0.1.0");
        assert_eq!(responses[0]["result"]["capabilities"]["tools"], true);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "hearth");
    }

    #[tokio::test]
    async fn tools_list_and_call_round_trip() {
        let tmp = tempdir().expect("tempdir");
        let store = store_with_model(tmp.path());
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("echo_tool", "pong")));
        let mut server = AcpServer::new(backend, store, registry, None).expect("server");

        let responses = serve(
            &mut server,
            &[
                json!({"jsonrpc":"2.0","id":1,"method":"tools/list"}),
                json!({"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo_tool","arguments":{}}}),
                json!({"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"nope","arguments":{}}}),
            ],
        )
        .await;

        assert_eq!(responses[0]["result"]["tools"][0]["name"], "echo_tool");
        assert!(responses[0]["result"]["tools"][0]["inputSchema"].is_object());
        assert_eq!(responses[1]["result"]["content"][0]["type"], "text");
        assert_eq!(responses[1]["result"]["content"][0]["text"], "pong");
        assert_eq!(responses[2]["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn chat_renders_tool_use_and_text_content() {
        let tmp = tempdir().expect("tempdir");
        let store = store_with_model(tmp.path());
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::tool_call_response("echo_tool", json!({"k":"v"})),
            ScriptedBackend::text_response("done"),
        ]));
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("echo_tool", "pong")));
        let mut server = AcpServer::new(backend, store, registry, None).expect("server");

        let responses = serve(
            &mut server,
            &[json!({"jsonrpc":"2.0","id":7,"method":"chat","params":{"message":"go"}})],
        )
        .await;
        let content = &responses[0]["result"]["content"];
        assert_eq!(content[0]["type"], "tool_use");
        assert_eq!(content[0]["name"], "echo_tool");
        assert_eq!(content[0]["input"]["k"], "v");
        assert_eq!(content[1]["type"], "tool_result");
        assert_eq!(content[1]["text"], "pong");
        assert_eq!(content[2]["type"], "text");
        assert_eq!(content[2]["text"], "done");
    }

    #[tokio::test]
    async fn protocol_errors_use_standard_codes() {
        let tmp = tempdir().expect("tempdir");
        let store = store_with_model(tmp.path());
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let mut server = AcpServer::new(backend, store, Registry::new(), None).expect("server");

        let input = "this is not json\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"bogus/method\"}\n{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tools/call\",\"params\":{}}\n";
        let mut output: Vec<u8> = Vec::new();
        server
            .run(input.as_bytes(), &mut output)
            .await
            .expect("serve");
        let responses: Vec<Value> = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|l| serde_json::from_str(l).expect("json"))
            .collect();
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["error"]["code"], -32601);
        assert_eq!(responses[2]["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn model_switch_persists_default() {
        let tmp = tempdir().expect("tempdir");
        let store = store_with_model(tmp.path());
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let mut server =
            AcpServer::new(backend, Arc::clone(&store), Registry::new(), None).expect("server");
        let responses = serve(
            &mut server,
            &[json!({"jsonrpc":"2.0","id":4,"method":"models/switch","params":{"model":"other"}})],
        )
        .await;
        assert_eq!(responses[0]["result"]["model"], "other");
        assert_eq!(store.snapshot().default_model, "other");
    }

    #[tokio::test]
    async fn missing_default_model_fails_startup() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let err = AcpServer::new(backend, store, Registry::new(), None).expect_err("no model");
        assert!(err.to_string().contains("no default model"));
    }
}
