use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Argument map for a tool invocation, keyed by parameter name.
pub type ArgMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_name: Some(tool_name.into()),
        }
    }
}

/// A request to invoke one tool, either taken from the backend's structured
/// field or recovered from the assistant's text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: ArgMap,
}

/// Schema-level description of a tool as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use super::{Message, Role};

    #[test]
    fn role_serializes_lowercase() {
        let s = serde_json::to_string(&Role::Assistant).expect("serialize");
        assert_eq!(s, "\"assistant\"");
    }

    #[test]
    fn tool_result_carries_tool_name() {
        let msg = Message::tool_result("read_file", "contents");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_name.as_deref(), Some("read_file"));
        let s = serde_json::to_string(&msg).expect("serialize");
        assert!(s.contains("\"tool_name\":\"read_file\""));
    }

    #[test]
    fn plain_message_omits_tool_name() {
        let s = serde_json::to_string(&Message::user("hi")).expect("serialize");
        assert!(!s.contains("tool_name"));
    }
}
