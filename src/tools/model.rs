use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ollama::{ChatRequest, ModelBackend};
use crate::tools::{Tool, ToolError};
use crate::types::{ArgMap, Message};

/// Lets the active model delegate a question to another local model.
pub struct AskModelTool {
    backend: Arc<dyn ModelBackend>,
    model: String,
    description: String,
}

impl AskModelTool {
    pub fn new(backend: Arc<dyn ModelBackend>, model: &str, description: &str) -> Self {
        Self {
            backend,
            model: model.to_string(),
            description: description.to_string(),
        }
    }
}

/// Tool names must stay slash-free and shell-safe; model tags like
/// `llama3.2:8b` are flattened.
fn sanitize_model_name(model: &str) -> String {
    model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
impl Tool for AskModelTool {
    fn name(&self) -> String {
        format!("ask_{}", sanitize_model_name(&self.model))
    }

    fn description(&self) -> String {
        if self.description.is_empty() {
            format!(
                "Ask the {} model a question. Use this when you need specialized help.",
                self.model
            )
        } else {
            self.description.clone()
        }
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question or prompt to send to the model"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("question must be a string".to_string()))?;
        let response = self
            .backend
            .chat(ChatRequest {
                model: self.model.clone(),
                messages: vec![Message::user(question)],
                tools: None,
            })
            .await
            .map_err(|e| ToolError::Failed(format!("ask {}: {e}", self.model)))?;
        Ok(response.message.content)
    }
}
