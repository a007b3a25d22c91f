use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tools::{Tool, ToolError};
use crate::types::ArgMap;

/// Persisted declaration of a user-defined command tool. The command is a
/// shell template with `{{param}}` holes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub params: Vec<CommandParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandParam {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

fn default_param_type() -> String {
    "string".to_string()
}

pub struct CustomCommandTool {
    spec: CustomToolSpec,
}

impl CustomCommandTool {
    pub fn new(spec: CustomToolSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CustomToolSpec {
        &self.spec
    }

    /// Substitutes every `{{param}}` occurrence with the argument's string
    /// form. Missing required params fail; missing optional params become
    /// empty strings.
    pub fn render_command(&self, args: &ArgMap) -> Result<String, ToolError> {
        let mut command = self.spec.command.clone();
        for param in &self.spec.params {
            let placeholder = format!("{{{{{}}}}}", param.name);
            let value = match args.get(&param.name) {
                Some(v) => stringify_value(v)?,
                None if param.required => {
                    return Err(ToolError::InvalidArguments(format!(
                        "missing required parameter: {}",
                        param.name
                    )));
                }
                None => String::new(),
            };
            command = command.replace(&placeholder, &value);
        }
        Ok(command)
    }
}

fn stringify_value(value: &Value) -> Result<String, ToolError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => serde_json::to_string(other)
            .map_err(|e| ToolError::InvalidArguments(format!("failed to convert parameter: {e}"))),
    }
}

#[async_trait]
impl Tool for CustomCommandTool {
    fn name(&self) -> String {
        self.spec.name.clone()
    }

    fn description(&self) -> String {
        self.spec.description.clone()
    }

    fn parameters(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.spec.params {
            properties.insert(
                param.name.clone(),
                json!({"type": param.kind, "description": param.description}),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        let mut schema = json!({
            "type": "object",
            "properties": properties
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        let command = self.render_command(args)?;
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Failed(format!("command failed: {e}")))?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(ToolError::Failed(format!(
                "command failed: exit status {}\nOutput: {}",
                output.status.code().unwrap_or(-1),
                combined
            )));
        }
        Ok(combined)
    }
}
