use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ArgMap, Message, Role, ToolCall, ToolDef};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Wall-clock ceiling for a single chat round trip. Local models can be slow
/// to load; anything past this is treated as a transport failure.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDef>>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "modified_at")]
    pub modified_at: Option<String>,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse>;

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;

    async fn is_available(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessageOut>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireToolEnvelope>>,
}

#[derive(Debug, Serialize)]
struct WireMessageOut {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolEnvelope {
    #[serde(rename = "type")]
    kind: String,
    function: WireToolFunction,
}

#[derive(Debug, Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    message: WireMessageIn,
}

#[derive(Debug, Deserialize)]
struct WireMessageIn {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct WireModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = if base_url.is_empty() {
            DEFAULT_OLLAMA_URL
        } else {
            base_url
        };
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            client,
            base_url: base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModelBackend for OllamaClient {
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let payload = to_wire_request(req);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to call Ollama endpoint at {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(anyhow!(
                "Ollama endpoint returned HTTP {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 200)
            ));
        }
        let wire: WireResponse = response
            .json()
            .await
            .context("failed to parse Ollama JSON response")?;
        Ok(from_wire_response(wire))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to list models at {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(anyhow!(
                "Ollama endpoint returned HTTP {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 200)
            ));
        }
        let list: WireModelList = response
            .json()
            .await
            .context("failed to parse Ollama model list")?;
        Ok(list.models)
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

fn to_wire_request(req: ChatRequest) -> WireRequest {
    let tools = req.tools.map(|defs| {
        defs.into_iter()
            .map(|t| WireToolEnvelope {
                kind: "function".to_string(),
                function: WireToolFunction {
                    name: t.name,
                    description: t.description,
                    parameters: t.parameters,
                },
            })
            .collect()
    });
    let messages = req
        .messages
        .into_iter()
        .map(|m| WireMessageOut {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string(),
            content: m.content,
            tool_name: m.tool_name,
        })
        .collect();
    WireRequest {
        model: req.model,
        messages,
        stream: false,
        tools,
    }
}

fn from_wire_response(wire: WireResponse) -> ChatResponse {
    let tool_calls = wire
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            name: tc.function.name,
            arguments: value_to_arg_map(tc.function.arguments),
        })
        .collect();
    ChatResponse {
        message: Message::assistant(wire.message.content.unwrap_or_default()),
        tool_calls,
    }
}

/// Models occasionally return arguments as a JSON-encoded string instead of
/// an object; accept both.
pub fn value_to_arg_map(value: Value) -> ArgMap {
    match value {
        Value::Object(map) => map,
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            _ => ArgMap::new(),
        },
        _ => ArgMap::new(),
    }
}

fn truncate_for_error(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Deterministic backend that replays a scripted response sequence. Drives
/// the agent loop in tests and offline smoke runs without a live server.
pub struct ScriptedBackend {
    responses: std::sync::Mutex<std::collections::VecDeque<ChatResponse>>,
    pub requests: std::sync::Mutex<Vec<ChatRequest>>,
    models: Vec<ModelInfo>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().collect()),
            requests: std::sync::Mutex::new(Vec::new()),
            models: Vec::new(),
        }
    }

    pub fn with_models(mut self, models: Vec<ModelInfo>) -> Self {
        self.models = models;
        self
    }

    pub fn text_response(content: &str) -> ChatResponse {
        ChatResponse {
            message: Message::assistant(content),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call_response(name: &str, arguments: Value) -> ChatResponse {
        ChatResponse {
            message: Message::assistant(""),
            tool_calls: vec![ToolCall {
                name: name.to_string(),
                arguments: value_to_arg_map(arguments),
            }],
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(req);
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front());
        next.ok_or_else(|| anyhow!("scripted backend exhausted"))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(self.models.clone())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
