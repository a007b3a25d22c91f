use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use globset::Glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ConfigStore, PermissionConfig, PermissionPattern};
use crate::tools::shell::SHELL_TOOL_NAME;
use crate::tools::{Tool, ToolError};
use crate::types::ArgMap;

/// Risk class of a tool, fixed when the tool is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Safe,
    Read,
    Write,
    Execute,
    Network,
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PermissionLevel::Safe => "safe",
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::Execute => "execute",
            PermissionLevel::Network => "network",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub tool: String,
    pub level: PermissionLevel,
    pub details: String,
    /// Path or command the call targets, when one could be extracted.
    pub target: Option<String>,
}

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Returns whether the user approved the call. Implementations may
    /// additionally persist an always-allow upgrade before answering.
    async fn request_permission(&self, request: PermissionRequest) -> anyhow::Result<bool>;
}

/// Used by the editor-protocol front-end, where the editor owns approval.
pub struct AutoApproveChecker;

#[async_trait]
impl PermissionChecker for AutoApproveChecker {
    async fn request_permission(&self, _request: PermissionRequest) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Decorator enforcing the per-tool risk policy. One gate wraps each tool at
/// registration time; the checker is injected so front-ends can swap
/// interactive prompting for auto-approval without touching the gate.
pub struct PermissionGate {
    tool: Arc<dyn Tool>,
    level: PermissionLevel,
    checker: Arc<dyn PermissionChecker>,
    store: Arc<ConfigStore>,
}

impl PermissionGate {
    pub fn new(
        tool: Arc<dyn Tool>,
        level: PermissionLevel,
        checker: Arc<dyn PermissionChecker>,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            tool,
            level,
            checker,
            store,
        }
    }

    pub fn level(&self) -> PermissionLevel {
        self.level
    }
}

/// Convenience for registration sites.
pub fn gated(
    tool: Arc<dyn Tool>,
    level: PermissionLevel,
    checker: Arc<dyn PermissionChecker>,
    store: Arc<ConfigStore>,
) -> Arc<dyn Tool> {
    Arc::new(PermissionGate::new(tool, level, checker, store))
}

#[async_trait]
impl Tool for PermissionGate {
    fn name(&self) -> String {
        self.tool.name()
    }

    fn description(&self) -> String {
        self.tool.description()
    }

    fn parameters(&self) -> Value {
        self.tool.parameters()
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        let name = self.tool.name();
        let (target, target_is_path) = extract_target(args);
        let perms = self.store.snapshot().permissions;

        if perms.restrict_to_working_dir && target_is_path && !target.is_empty() {
            check_working_dir(&target)?;
        }

        if matches_always_allow(&perms.always_allow_patterns, &name, &target) {
            return self.tool.execute(args).await;
        }

        if name == SHELL_TOOL_NAME {
            if let Some(command) = args.get("command").and_then(|v| v.as_str()) {
                for blocked in &perms.blocked_commands {
                    if !blocked.is_empty() && command.contains(blocked.as_str()) {
                        return Err(ToolError::BlockedCommand {
                            pattern: blocked.clone(),
                        });
                    }
                }
            }
        }

        if needs_approval(self.level, &perms) {
            let details = format!("Args: {}", Value::Object(args.clone()));
            let request = PermissionRequest {
                tool: name,
                level: self.level,
                details,
                target: if target.is_empty() { None } else { Some(target) },
            };
            let approved = self
                .checker
                .request_permission(request)
                .await
                .map_err(|e| ToolError::Failed(format!("permission check failed: {e}")))?;
            if !approved {
                return Err(ToolError::PermissionDenied(
                    "permission denied by user".to_string(),
                ));
            }
        }

        self.tool.execute(args).await
    }
}

/// Pulls the token the gate reasons about: a path for file tools, the
/// command string for the shell tool, empty otherwise.
fn extract_target(args: &ArgMap) -> (String, bool) {
    if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
        return (path.to_string(), true);
    }
    if let Some(path) = args.get("file_path").and_then(|v| v.as_str()) {
        return (path.to_string(), true);
    }
    if let Some(command) = args.get("command").and_then(|v| v.as_str()) {
        return (command.to_string(), false);
    }
    (String::new(), false)
}

fn needs_approval(level: PermissionLevel, perms: &PermissionConfig) -> bool {
    match level {
        PermissionLevel::Safe => !perms.auto_approve_safe,
        PermissionLevel::Read => !perms.auto_approve_read,
        PermissionLevel::Write => perms.require_approval_write,
        PermissionLevel::Execute => perms.require_approval_execute,
        PermissionLevel::Network => perms.require_approval_network,
    }
}

fn matches_always_allow(patterns: &[PermissionPattern], tool_name: &str, target: &str) -> bool {
    for pattern in patterns.iter().filter(|p| p.enabled) {
        if pattern.tool != "*" && pattern.tool != tool_name {
            continue;
        }
        if pattern.always_allow {
            return true;
        }
        if !pattern.command_pattern.is_empty()
            && tool_name == SHELL_TOOL_NAME
            && !target.is_empty()
            && target.split_whitespace().next() == Some(pattern.command_pattern.as_str())
        {
            return true;
        }
        if !pattern.path_pattern.is_empty() && !target.is_empty() {
            if let Ok(glob) = Glob::new(&pattern.path_pattern) {
                if glob.compile_matcher().is_match(target) {
                    return true;
                }
            }
            let cleaned_target = normalize_path(Path::new(target));
            let cleaned_pattern = normalize_path(Path::new(&pattern.path_pattern));
            if cleaned_target.starts_with(&cleaned_pattern) {
                return true;
            }
        }
    }
    false
}

fn check_working_dir(target: &str) -> Result<(), ToolError> {
    let workdir = std::env::current_dir()
        .map_err(|e| ToolError::Failed(format!("failed to get working directory: {e}")))?;
    let candidate = Path::new(target);
    let absolute = if candidate.is_absolute() {
        normalize_path(candidate)
    } else {
        normalize_path(&workdir.join(candidate))
    };
    let workdir = normalize_path(&workdir);
    if absolute.starts_with(&workdir) {
        Ok(())
    } else {
        Err(ToolError::OutsideWorkingDir {
            path: target.to_string(),
            workdir: workdir.display().to_string(),
        })
    }
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem, so restriction checks work for paths that don't exist yet.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
