use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tools::{Tool, ToolError};
use crate::types::ArgMap;

fn require_str<'a>(args: &'a ArgMap, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{key} must be a string")))
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> String {
        "read_file".to_string()
    }

    fn description(&self) -> String {
        "Read the contents of a file from the filesystem".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        let path = require_str(args, "path")?;
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::Failed(format!("read file: {e}")))
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> String {
        "write_file".to_string()
    }

    fn description(&self) -> String {
        "Write content to a file, creating it if it doesn't exist".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to write"},
                "content": {"type": "string", "description": "Content to write to the file"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        let path = require_str(args, "path")?;
        let content = require_str(args, "content")?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::Failed(format!("create directory: {e}")))?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| ToolError::Failed(format!("write file: {e}")))?;
        Ok(format!("Successfully wrote {} bytes to {}", content.len(), path))
    }
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> String {
        "list_files".to_string()
    }

    fn description(&self) -> String {
        "List files in a directory, optionally recursively".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the directory to list"},
                "recursive": {"type": "boolean", "description": "Whether to list files recursively"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        let path = require_str(args, "path")?.to_string();
        let recursive = args
            .get("recursive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        // Directory walking is blocking; keep it off the async threads.
        tokio::task::spawn_blocking(move || list_entries(&path, recursive))
            .await
            .map_err(|e| ToolError::Failed(format!("list task failed: {e}")))?
    }
}

fn list_entries(path: &str, recursive: bool) -> Result<String, ToolError> {
    let mut entries = Vec::new();
    if recursive {
        for entry in WalkDir::new(path) {
            let entry = entry.map_err(|e| ToolError::Failed(format!("walk directory: {e}")))?;
            entries.push(entry.path().display().to_string());
        }
    } else {
        let dir = std::fs::read_dir(path)
            .map_err(|e| ToolError::Failed(format!("read directory: {e}")))?;
        for entry in dir {
            let entry = entry.map_err(|e| ToolError::Failed(format!("read directory: {e}")))?;
            entries.push(entry.path().display().to_string());
        }
        entries.sort();
    }
    Ok(entries.join("\n"))
}
