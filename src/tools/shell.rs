use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::tools::{Tool, ToolError};
use crate::types::ArgMap;

/// Canonical name of the shell tool. Blocked-command scanning and
/// always-allow command patterns key off this exact name.
pub const SHELL_TOOL_NAME: &str = "run_command";

/// Progress of one shell invocation, tagged with a unique id so a front-end
/// can interleave output from concurrent commands.
#[derive(Debug, Clone)]
pub enum CommandStreamEvent {
    Started { id: String, command: String },
    Line { id: String, line: String, stderr: bool },
    Finished { id: String, exit_code: Option<i32> },
}

/// Runs one shell command to completion and returns its combined output.
/// The chat front-end installs an executor that additionally streams output
/// lines as they arrive; the gate still observes a single blocking call.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &str) -> Result<String, ToolError>;
}

/// Captures combined stdout+stderr with no streaming; used by the
/// editor-protocol server and tests.
pub struct CaptureExecutor;

#[async_trait]
impl CommandExecutor for CaptureExecutor {
    async fn run(&self, command: &str) -> Result<String, ToolError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Failed(format!("failed to run command: {e}")))?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            combined.push_str(&format!("\nError: exit status {}", exit_code_of(&output.status)));
        }
        Ok(combined)
    }
}

/// Streams stdout and stderr line-by-line through `emit` while accumulating
/// the combined output for the tool result.
pub struct StreamingExecutor {
    emit: Arc<dyn Fn(CommandStreamEvent) + Send + Sync>,
}

impl StreamingExecutor {
    pub fn new(emit: Arc<dyn Fn(CommandStreamEvent) + Send + Sync>) -> Self {
        Self { emit }
    }
}

#[async_trait]
impl CommandExecutor for StreamingExecutor {
    async fn run(&self, command: &str) -> Result<String, ToolError> {
        let id = Uuid::new_v4().to_string();
        (self.emit)(CommandStreamEvent::Started {
            id: id.clone(),
            command: command.to_string(),
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Failed(format!("failed to run command: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Failed("failed to open command stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::Failed("failed to open command stderr".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut combined = String::new();
        let mut out_done = false;
        let mut err_done = false;

        while !out_done || !err_done {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => {
                        (self.emit)(CommandStreamEvent::Line {
                            id: id.clone(),
                            line: line.clone(),
                            stderr: false,
                        });
                        combined.push_str(&line);
                        combined.push('\n');
                    }
                    _ => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) => {
                        (self.emit)(CommandStreamEvent::Line {
                            id: id.clone(),
                            line: line.clone(),
                            stderr: true,
                        });
                        combined.push_str(&line);
                        combined.push('\n');
                    }
                    _ => err_done = true,
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ToolError::Failed(format!("failed to wait for command: {e}")))?;
        (self.emit)(CommandStreamEvent::Finished {
            id,
            exit_code: status.code(),
        });
        if !status.success() {
            combined.push_str(&format!("\nError: exit status {}", exit_code_of(&status)));
        }
        Ok(combined)
    }
}

fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

pub struct RunCommandTool {
    executor: Arc<dyn CommandExecutor>,
}

impl RunCommandTool {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> String {
        SHELL_TOOL_NAME.to_string()
    }

    fn description(&self) -> String {
        "Execute a shell command and return the output".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to execute"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("command must be a string".to_string()))?;
        self.executor.run(command).await
    }
}
