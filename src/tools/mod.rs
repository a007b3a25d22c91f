pub mod custom;
pub mod fs;
pub mod gate;
pub mod http;
pub mod model;
pub mod shell;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{ArgMap, ToolDef};

/// A named, schema-described operation exposed to the model. New tool kinds
/// (built-in, custom command, external-server wrapper, sub-model) implement
/// this one interface; there is no deeper hierarchy.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique within a registry; must not contain slashes.
    fn name(&self) -> String;

    fn description(&self) -> String;

    /// JSON-Schema object describing the accepted arguments. Stable for the
    /// lifetime of the tool.
    fn parameters(&self) -> Value;

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError>;
}

#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound { name: String },
    InvalidArguments(String),
    PermissionDenied(String),
    BlockedCommand { pattern: String },
    OutsideWorkingDir { path: String, workdir: String },
    ExternalServer { server: String, message: String },
    Cancelled,
    Failed(String),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::NotFound { name } => write!(f, "tool not found: {name}"),
            ToolError::InvalidArguments(msg) => write!(f, "{msg}"),
            ToolError::PermissionDenied(msg) => write!(f, "{msg}"),
            ToolError::BlockedCommand { pattern } => {
                write!(f, "blocked command pattern detected: {pattern}")
            }
            ToolError::OutsideWorkingDir { path, workdir } => write!(
                f,
                "access denied: path '{path}' is outside working directory '{workdir}'"
            ),
            ToolError::ExternalServer { server, message } => {
                write!(f, "tool server '{server}': {message}")
            }
            ToolError::Cancelled => write!(f, "operation cancelled"),
            ToolError::Failed(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Name-keyed tool collection shared across the agent, the chat front-end
/// and the editor-protocol server. Reads clone cheap `Arc` handles; the map
/// itself is only locked for the duration of a lookup or mutation.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<BTreeMap<String, Arc<dyn Tool>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(tool.name(), tool);
        }
    }

    pub fn unregister(&self, name: &str) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.read().ok().and_then(|map| map.get(name).cloned())
    }

    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        self.inner
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_filtered(&self, disabled: &[String]) -> Vec<Arc<dyn Tool>> {
        self.all()
            .into_iter()
            .filter(|t| !disabled.iter().any(|d| d == &t.name()))
            .collect()
    }

    pub fn tool_defs(&self, disabled: &[String]) -> Vec<ToolDef> {
        self.all_filtered(disabled)
            .into_iter()
            .map(|t| ToolDef {
                name: t.name(),
                description: t.description(),
                parameters: t.parameters(),
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, args: &ArgMap) -> Result<String, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        tool.execute(args).await
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testutil::EchoTool;
    use super::{Registry, ToolError};
    use crate::types::ArgMap;

    #[tokio::test]
    async fn register_get_execute_unregister() {
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("alpha", "a")));
        registry.register(Arc::new(EchoTool::new("beta", "b")));

        assert!(registry.get("alpha").is_some());
        let out = registry.execute("beta", &ArgMap::new()).await.expect("execute");
        assert_eq!(out, "b");

        registry.unregister("alpha");
        assert!(registry.get("alpha").is_none());
        let err = registry.execute("alpha", &ArgMap::new()).await.expect_err("missing");
        assert!(matches!(err, ToolError::NotFound { .. }));
        assert_eq!(err.to_string(), "tool not found: alpha");
    }

    #[test]
    fn later_registration_wins() {
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("dup", "first")));
        registry.register(Arc::new(EchoTool::new("dup", "second")));
        let tool = registry.get("dup").expect("tool");
        assert_eq!(tool.description(), "Echoes 'second'");
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn filtered_listing_excludes_disabled() {
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("keep", "k")));
        registry.register(Arc::new(EchoTool::new("drop", "d")));
        let names: Vec<String> = registry
            .all_filtered(&["drop".to_string()])
            .into_iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["keep".to_string()]);
    }

    #[test]
    fn listing_is_name_ordered() {
        let registry = Registry::new();
        registry.register(Arc::new(EchoTool::new("zeta", "z")));
        registry.register(Arc::new(EchoTool::new("alpha", "a")));
        let names: Vec<String> = registry.all().into_iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
