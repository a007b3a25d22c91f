use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::dialect::ToolCallFormat;
use crate::events::{Event, EventKind, EventSink};
use crate::ollama::{ChatRequest, ModelBackend};
use crate::tools::Registry;
use crate::types::{ArgMap, Message, Role};

/// Hard cap on backend round trips per user turn. Bounds runaway tool loops
/// and the cost of a wedged model; exceeding it fails the turn.
pub const MAX_TURN_ITERATIONS: usize = 10;

#[derive(Debug)]
pub struct IterationCapReached {
    pub cap: usize,
}

impl std::fmt::Display for IterationCapReached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "agent reached the iteration cap ({}) without completing the turn",
            self.cap
        )
    }
}

impl std::error::Error for IterationCapReached {}

/// One executed tool call, for rendering and for the editor protocol.
/// `result` is `Err` with the raw error text when execution failed.
#[derive(Debug, Clone)]
pub struct ToolExecutionRecord {
    pub name: String,
    pub arguments: ArgMap,
    pub result: Result<String, String>,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolExecutionRecord>,
}

/// Per-conversation orchestrator: turns one user message into a final
/// assistant answer, interleaving any number of tool invocations.
pub struct Agent {
    backend: Arc<dyn ModelBackend>,
    registry: Registry,
    model: String,
    format: ToolCallFormat,
    system_prompts: BTreeMap<String, String>,
    messages: Vec<Message>,
    disabled_tools: Vec<String>,
    events: Option<Box<dyn EventSink>>,
}

impl Agent {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Registry,
        config: &Config,
        model: &str,
    ) -> Self {
        Self {
            backend,
            registry,
            model: model.to_string(),
            format: config.tool_call_format(model),
            system_prompts: config.system_prompts.clone(),
            messages: Vec::new(),
            disabled_tools: config.disabled_tools.clone(),
            events: None,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn format(&self) -> ToolCallFormat {
        self.format
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Effective disabled set: config-level plus session-level names.
    pub fn set_disabled_tools(&mut self, disabled: Vec<String>) {
        self.disabled_tools = disabled;
    }

    pub fn set_event_sink(&mut self, sink: Box<dyn EventSink>) {
        self.events = Some(sink);
    }

    /// Appends the dialect-appropriate system prompt with the rendered tool
    /// list substituted for the `{{TOOLS}}` marker.
    pub fn add_system_prompt(&mut self, custom: Option<&str>) {
        let template = match custom {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => self
                .system_prompts
                .get(self.format.prompt_key())
                .cloned()
                .unwrap_or_default(),
        };
        let prompt = template.replace("{{TOOLS}}", &self.render_tool_list());
        self.messages.push(Message::system(prompt));
    }

    fn render_tool_list(&self) -> String {
        let mut out = String::new();
        for tool in self.registry.all_filtered(&self.disabled_tools) {
            out.push_str(&format!("\n- {}: {}\n", tool.name(), tool.description()));
            let schema = serde_json::to_string_pretty(&tool.parameters())
                .unwrap_or_else(|_| "{}".to_string());
            out.push_str(&format!("  Parameters: {}\n", schema.replace('\n', "\n  ")));
        }
        out
    }

    /// Drops everything except system messages.
    pub fn clear_history(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    pub async fn chat(&mut self, user_message: &str) -> anyhow::Result<TurnOutcome> {
        let run_id = Uuid::new_v4().to_string();
        self.emit(&run_id, 0, EventKind::RunStart, json!({"model": self.model}));
        self.messages.push(Message::user(user_message));

        let mut executed = Vec::new();
        for step in 0..MAX_TURN_ITERATIONS {
            let step_no = step as u32;
            let tools = if self.format.attaches_request_tools() {
                Some(self.registry.tool_defs(&self.disabled_tools))
            } else {
                None
            };
            self.emit(
                &run_id,
                step_no,
                EventKind::ModelRequest,
                json!({"messages": self.messages.len()}),
            );
            let response = match self
                .backend
                .chat(ChatRequest {
                    model: self.model.clone(),
                    messages: self.messages.clone(),
                    tools,
                })
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    self.emit(
                        &run_id,
                        step_no,
                        EventKind::Error,
                        json!({"error": e.to_string()}),
                    );
                    self.emit(
                        &run_id,
                        step_no,
                        EventKind::RunEnd,
                        json!({"exit": "transport_error"}),
                    );
                    return Err(e.context("chat request"));
                }
            };

            self.messages.push(response.message.clone());
            let calls = self.format.extract_calls(&response);
            if calls.is_empty() {
                self.emit(&run_id, step_no, EventKind::RunEnd, json!({"exit": "ok"}));
                return Ok(TurnOutcome {
                    content: response.message.content,
                    tool_calls: executed,
                });
            }

            self.emit(
                &run_id,
                step_no,
                EventKind::ToolCallDetected,
                json!({"count": calls.len()}),
            );
            for call in calls {
                self.emit(
                    &run_id,
                    step_no,
                    EventKind::ToolExecStart,
                    json!({"tool": call.name}),
                );
                let result = self.registry.execute(&call.name, &call.arguments).await;
                let record = ToolExecutionRecord {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: result.as_ref().map(|s| s.clone()).map_err(|e| e.to_string()),
                };
                // Tool failures are not fatal: the textual error goes back
                // to the model, which can change its approach.
                let message_content = match &result {
                    Ok(output) => output.clone(),
                    Err(e) => format!("Error executing tool {}: {}", call.name, e),
                };
                self.emit(
                    &run_id,
                    step_no,
                    EventKind::ToolExecEnd,
                    json!({"tool": call.name, "ok": result.is_ok()}),
                );
                self.messages
                    .push(Message::tool_result(call.name, message_content));
                executed.push(record);
            }
        }

        self.emit(
            &run_id,
            MAX_TURN_ITERATIONS as u32,
            EventKind::RunEnd,
            json!({"exit": "iteration_cap"}),
        );
        Err(IterationCapReached {
            cap: MAX_TURN_ITERATIONS,
        }
        .into())
    }

    fn emit(&mut self, run_id: &str, step: u32, kind: EventKind, data: serde_json::Value) {
        if let Some(sink) = &mut self.events {
            if let Err(e) = sink.emit(Event::new(run_id.to_string(), step, kind, data)) {
                eprintln!("WARN: failed to emit event: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{Agent, IterationCapReached, MAX_TURN_ITERATIONS};
    use crate::config::{Config, ModelCapability};
    use crate::dialect::ToolCallFormat;
    use crate::ollama::ScriptedBackend;
    use crate::tools::testutil::EchoTool;
    use crate::tools::Registry;
    use crate::types::Role;

    fn config_with_format(model: &str, format: ToolCallFormat) -> Config {
        let mut config = Config::default();
        config.model_capabilities.insert(
            model.to_string(),
            ModelCapability {
                supports_tools: format == ToolCallFormat::Native,
                tool_call_format: format,
                recommended_for: Vec::new(),
            },
        );
        config
    }

    #[tokio::test]
    async fn plain_answer_ends_turn_after_one_round_trip() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text_response(
            "hello there",
        )]));
        let registry = Registry::new();
        let config = config_with_format("m", ToolCallFormat::Native);
        let mut agent = Agent::new(Arc::clone(&backend) as _, registry, &config, "m");
        let outcome = agent.chat("hi").await.expect("chat");
        assert_eq!(outcome.content, "hello there");
        assert!(outcome.tool_calls.is_empty());
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn native_dialect_attaches_tool_schemas() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text_response(
            "done",
        )]));
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("echo_tool", "hi")));
        let config = config_with_format("m", ToolCallFormat::Native);
        let mut agent = Agent::new(Arc::clone(&backend) as _, registry, &config, "m");
        agent.chat("hi").await.expect("chat");
        let requests = backend.requests.lock().expect("lock");
        let tools = requests[0].tools.as_ref().expect("tools attached");
        assert_eq!(tools[0].name, "echo_tool");
    }

    #[tokio::test]
    async fn fallback_dialect_omits_tool_schemas() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text_response(
            "done",
        )]));
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("echo_tool", "hi")));
        let config = config_with_format("m", ToolCallFormat::Tagged);
        let mut agent = Agent::new(Arc::clone(&backend) as _, registry, &config, "m");
        agent.chat("hi").await.expect("chat");
        let requests = backend.requests.lock().expect("lock");
        assert!(requests[0].tools.is_none());
    }

    #[tokio::test]
    async fn tool_round_appends_result_and_continues() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::tool_call_response("echo_tool", json!({})),
            ScriptedBackend::text_response("all done"),
        ]));
        let registry = Registry::new();
        let tool = Arc::new(EchoTool::new("echo_tool", "echoed"));
        let calls = Arc::clone(&tool.calls);
        registry.register(tool);
        let config = config_with_format("m", ToolCallFormat::Native);
        let mut agent = Agent::new(Arc::clone(&backend) as _, registry, &config, "m");

        let outcome = agent.chat("go").await.expect("chat");
        assert_eq!(outcome.content, "all done");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let tool_msg = agent
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool message");
        assert_eq!(tool_msg.tool_name.as_deref(), Some("echo_tool"));
        assert_eq!(tool_msg.content, "echoed");
    }

    #[tokio::test]
    async fn unknown_tool_error_is_looped_back_not_fatal() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedBackend::tool_call_response("missing_tool", json!({})),
            ScriptedBackend::text_response("recovered"),
        ]));
        let config = config_with_format("m", ToolCallFormat::Native);
        let mut agent = Agent::new(backend, Registry::new(), &config, "m");
        let outcome = agent.chat("go").await.expect("chat");
        assert_eq!(outcome.content, "recovered");
        let tool_msg = agent
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool message");
        assert_eq!(
            tool_msg.content,
            "Error executing tool missing_tool: tool not found: missing_tool"
        );
    }

    #[tokio::test]
    async fn iteration_cap_bounds_round_trips() {
        let looping: Vec<_> = (0..MAX_TURN_ITERATIONS + 2)
            .map(|_| ScriptedBackend::tool_call_response("echo_tool", json!({})))
            .collect();
        let backend = Arc::new(ScriptedBackend::new(looping));
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("echo_tool", "out")));
        let config = config_with_format("m", ToolCallFormat::Native);
        let mut agent = Agent::new(Arc::clone(&backend) as _, registry, &config, "m");

        let err = agent.chat("loop").await.expect_err("cap");
        assert!(err.downcast_ref::<IterationCapReached>().is_some());
        assert_eq!(backend.request_count(), MAX_TURN_ITERATIONS);
    }

    #[tokio::test]
    async fn transport_error_fails_the_turn() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let config = config_with_format("m", ToolCallFormat::Native);
        let mut agent = Agent::new(backend, Registry::new(), &config, "m");
        let err = agent.chat("hi").await.expect_err("transport");
        assert!(err.to_string().contains("chat request"));
    }

    #[tokio::test]
    async fn system_prompt_renders_enabled_tools() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("echo_tool", "hi")));
        registry.register(Arc::new(EchoTool::new("hidden_tool", "no")));
        let mut config = config_with_format("m", ToolCallFormat::LinePrefixed);
        config.disabled_tools = vec!["hidden_tool".to_string()];
        let mut agent = Agent::new(backend, registry, &config, "m");
        agent.add_system_prompt(None);

        let system = &agent.messages()[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("USE_TOOL"));
        assert!(system.content.contains("- echo_tool:"));
        assert!(system.content.contains("Parameters:"));
        assert!(!system.content.contains("hidden_tool"));
        assert!(!system.content.contains("{{TOOLS}}"));
    }

    #[tokio::test]
    async fn custom_system_prompt_still_substitutes_marker() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("echo_tool", "hi")));
        let config = config_with_format("m", ToolCallFormat::Native);
        let mut agent = Agent::new(backend, registry, &config, "m");
        agent.add_system_prompt(Some("Custom. Tools:{{TOOLS}}"));
        let system = &agent.messages()[0];
        assert!(system.content.starts_with("Custom."));
        assert!(system.content.contains("- echo_tool:"));
    }

    #[tokio::test]
    async fn clear_history_keeps_only_system_messages() {
        let backend = Arc::new(ScriptedBackend::new(vec![ScriptedBackend::text_response(
            "yo",
        )]));
        let config = config_with_format("m", ToolCallFormat::Native);
        let mut agent = Agent::new(backend, Registry::new(), &config, "m");
        agent.add_system_prompt(None);
        agent.chat("hi").await.expect("chat");
        assert!(agent.messages().len() > 1);
        agent.clear_history();
        assert_eq!(agent.messages().len(), 1);
        assert_eq!(agent.messages()[0].role, Role::System);
    }
}
