use std::sync::Arc;

use serde_json::json;

use crate::config::ModelCapability;
use crate::dialect::ToolCallFormat;
use crate::ollama::{ChatRequest, ModelBackend};
use crate::types::{Message, ToolDef};

pub type ProgressSender = tokio::sync::mpsc::Sender<String>;

/// Progress reporting never blocks benchmarking; a full channel drops the
/// message.
pub fn report(progress: Option<&ProgressSender>, message: String) {
    if let Some(tx) = progress {
        let _ = tx.try_send(message);
    }
}

/// Probes a model with up to three test prompts to classify its tool-call
/// dialect. Transport errors count as a negative for the probed dialect.
pub struct CapabilityDetector {
    backend: Arc<dyn ModelBackend>,
}

impl CapabilityDetector {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    pub async fn detect(&self, model: &str, progress: Option<&ProgressSender>) -> ModelCapability {
        report(
            progress,
            format!("Testing {model} for native tool support..."),
        );
        if self.probe_native(model).await {
            report(progress, format!("ok: {model} supports native tools"));
            return ModelCapability {
                supports_tools: true,
                tool_call_format: ToolCallFormat::Native,
                recommended_for: Vec::new(),
            };
        }

        report(
            progress,
            format!("{model} doesn't support native tools, testing fallbacks..."),
        );
        if self.probe_tagged(model).await {
            report(progress, format!("ok: {model} works with the tagged format"));
            return ModelCapability {
                supports_tools: false,
                tool_call_format: ToolCallFormat::Tagged,
                recommended_for: Vec::new(),
            };
        }
        if self.probe_fenced_json(model).await {
            report(
                progress,
                format!("ok: {model} works with the fenced-json format"),
            );
            return ModelCapability {
                supports_tools: false,
                tool_call_format: ToolCallFormat::FencedJson,
                recommended_for: Vec::new(),
            };
        }

        // Defensive default: the agent can still parse USE_TOOL/ARGS pairs
        // even when no probe confirmed them.
        report(progress, format!("{model} will use the line-prefixed format"));
        ModelCapability {
            supports_tools: false,
            tool_call_format: ToolCallFormat::LinePrefixed,
            recommended_for: Vec::new(),
        }
    }

    async fn probe_native(&self, model: &str) -> bool {
        let test_tool = ToolDef {
            name: "test_tool".to_string(),
            description: "A test tool".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "test": {"type": "string", "description": "A test parameter"}
                }
            }),
        };
        let result = self
            .backend
            .chat(ChatRequest {
                model: model.to_string(),
                messages: vec![Message::user("Use the test_tool with test='hello'")],
                tools: Some(vec![test_tool]),
            })
            .await;
        match result {
            Ok(resp) => !resp.tool_calls.is_empty(),
            Err(_) => false,
        }
    }

    async fn probe_tagged(&self, model: &str) -> bool {
        let prompt = "You have access to a test_tool. To use it, respond with:\n\
                      <tool_call>\n<name>test_tool</name>\n<arguments>{\"test\": \"hello\"}</arguments>\n</tool_call>\n\n\
                      Now use the test_tool with test='hello'.";
        let result = self
            .backend
            .chat(ChatRequest {
                model: model.to_string(),
                messages: vec![Message::user(prompt)],
                tools: None,
            })
            .await;
        match result {
            Ok(resp) => {
                let content = resp.message.content;
                content.contains("<tool_call>") && content.contains("<name>test_tool</name>")
            }
            Err(_) => false,
        }
    }

    async fn probe_fenced_json(&self, model: &str) -> bool {
        let prompt = "You have access to a test_tool. To use it, respond with a JSON block:\n\
                      ```json\n{\"tool_call\": {\"name\": \"test_tool\", \"arguments\": {\"test\": \"hello\"}}}\n```\n\n\
                      Now use the test_tool with test='hello'.";
        let result = self
            .backend
            .chat(ChatRequest {
                model: model.to_string(),
                messages: vec![Message::user(prompt)],
                tools: None,
            })
            .await;
        match result {
            Ok(resp) => {
                let content = resp.message.content;
                content.contains("tool_call") && content.contains("test_tool")
            }
            Err(_) => false,
        }
    }
}
