pub mod coordinator;
pub mod permission;
pub mod repl;

use tokio::sync::oneshot;

use crate::agent::ToolExecutionRecord;
use crate::tools::gate::PermissionRequest;
use crate::tools::shell::CommandStreamEvent;

/// Everything a chat front-end needs to render. The coordinator and its
/// collaborators push these over one channel; any conforming view (terminal,
/// programmatic driver) drains it.
pub enum UiUpdate {
    TurnFinished(TurnReport),
    PermissionPrompt(PendingPermission),
    CommandStream(CommandStreamEvent),
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct TurnReport {
    pub content: String,
    pub tool_calls: Vec<ToolExecutionRecord>,
    pub error: Option<String>,
}

/// A gate call suspended on user input. Sending on `reply` resumes it.
pub struct PendingPermission {
    pub request: PermissionRequest,
    pub reply: oneshot::Sender<PermissionReply>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionReply {
    pub approved: bool,
    /// Always allow this tool, no restrictions.
    pub always_tool: bool,
    /// For the shell tool: always allow this command word.
    pub always_command: bool,
    /// Always allow under the targeted path.
    pub always_path: bool,
}

impl PermissionReply {
    pub fn deny() -> Self {
        Self::default()
    }

    pub fn approve_once() -> Self {
        Self {
            approved: true,
            ..Self::default()
        }
    }
}
