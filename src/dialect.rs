use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ollama::ChatResponse;
use crate::types::{ArgMap, ToolCall};

/// How the active model asks for a tool. `Native` models return a structured
/// field; the rest teach the model a text convention and parse it back out.
/// Every place the agent varies by dialect goes through this enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallFormat {
    Native,
    Tagged,
    FencedJson,
    #[default]
    LinePrefixed,
    None,
}

impl ToolCallFormat {
    /// Key of the system-prompt template for this dialect.
    pub fn prompt_key(self) -> &'static str {
        match self {
            ToolCallFormat::Native | ToolCallFormat::None => "default",
            ToolCallFormat::Tagged => "tool_tagged",
            ToolCallFormat::FencedJson => "tool_fenced_json",
            ToolCallFormat::LinePrefixed => "tool_line_prefixed",
        }
    }

    /// Only the native dialect sends tool schemas in the request body.
    pub fn attaches_request_tools(self) -> bool {
        matches!(self, ToolCallFormat::Native)
    }

    pub fn extract_calls(self, resp: &ChatResponse) -> Vec<ToolCall> {
        // A structured field wins regardless of dialect; some models emit it
        // even when prompted with a text convention.
        if !resp.tool_calls.is_empty() {
            return resp.tool_calls.clone();
        }
        let content = resp.message.content.as_str();
        match self {
            ToolCallFormat::Tagged => parse_tagged(content),
            ToolCallFormat::FencedJson => parse_fenced_json(content),
            ToolCallFormat::LinePrefixed => parse_line_prefixed(content),
            ToolCallFormat::Native | ToolCallFormat::None => Vec::new(),
        }
    }
}

impl std::fmt::Display for ToolCallFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolCallFormat::Native => "native",
            ToolCallFormat::Tagged => "tagged",
            ToolCallFormat::FencedJson => "fenced_json",
            ToolCallFormat::LinePrefixed => "line_prefixed",
            ToolCallFormat::None => "none",
        };
        f.write_str(s)
    }
}

fn parse_tagged(content: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(open) = rest.find("<tool_call>") {
        let after_open = &rest[open + "<tool_call>".len()..];
        let Some(close) = after_open.find("</tool_call>") else {
            break;
        };
        let block = &after_open[..close];
        rest = &after_open[close + "</tool_call>".len()..];

        let Some(name) = between(block, "<name>", "</name>") else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let arguments = between(block, "<arguments>", "</arguments>")
            .map(|raw| parse_args_object(raw.trim()))
            .unwrap_or_default();
        calls.push(ToolCall {
            name: name.to_string(),
            arguments,
        });
    }
    calls
}

fn parse_fenced_json(content: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(open) = rest.find("```json") {
        let after_marker = &rest[open + "```json".len()..];
        // The block body starts after the marker line.
        let body_start = after_marker.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_marker[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        let block = &body[..close];
        rest = &body[close + "```".len()..];

        let Ok(parsed) = serde_json::from_str::<Value>(block) else {
            continue;
        };
        let Some(call) = parsed.get("tool_call") else {
            continue;
        };
        let Some(name) = call.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let arguments = call
            .get("arguments")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        calls.push(ToolCall {
            name: name.to_string(),
            arguments,
        });
    }
    calls
}

fn parse_line_prefixed(content: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let lines: Vec<&str> = content.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if let Some(name) = line.strip_prefix("USE_TOOL:") {
            let name = name.trim();
            if !name.is_empty() && i + 1 < lines.len() {
                let next = lines[i + 1].trim();
                if let Some(raw_args) = next.strip_prefix("ARGS:") {
                    calls.push(ToolCall {
                        name: name.to_string(),
                        arguments: parse_args_object(raw_args.trim()),
                    });
                    i += 1;
                }
            }
        }
        i += 1;
    }
    calls
}

fn between<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let end = haystack[start..].find(close)? + start;
    Some(&haystack[start..end])
}

/// Malformed argument JSON degrades to an empty map; the tool's own required
/// parameter checks produce the user-visible error.
fn parse_args_object(raw: &str) -> ArgMap {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => ArgMap::new(),
    }
}
