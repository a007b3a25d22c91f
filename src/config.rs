use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::dialect::ToolCallFormat;
use crate::tools::custom::CustomToolSpec;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ollama_url: String,
    pub default_model: String,
    pub benchmark_tasks: Vec<BenchmarkTask>,
    pub system_prompts: BTreeMap<String, String>,
    pub model_capabilities: BTreeMap<String, ModelCapability>,
    pub model_as_tools: Vec<ModelAsTool>,
    pub permissions: PermissionConfig,
    pub disabled_tools: Vec<String>,
    pub custom_tools: Vec<CustomToolSpec>,
    pub mcp_servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkTask {
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub category: TaskCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Coding,
    Reasoning,
    ToolUse,
    Creative,
    General,
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskCategory::Coding => "coding",
            TaskCategory::Reasoning => "reasoning",
            TaskCategory::ToolUse => "tool_use",
            TaskCategory::Creative => "creative",
            TaskCategory::General => "general",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelCapability {
    pub supports_tools: bool,
    pub tool_call_format: ToolCallFormat,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_for: Vec<TaskCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAsTool {
    pub model_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub auto_approve_safe: bool,
    pub auto_approve_read: bool,
    pub require_approval_write: bool,
    pub require_approval_execute: bool,
    pub require_approval_network: bool,
    pub blocked_commands: Vec<String>,
    pub always_allow_patterns: Vec<PermissionPattern>,
    pub restrict_to_working_dir: bool,
}

/// A persisted rule that suppresses the permission prompt for future
/// matching calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PermissionPattern {
    /// Tool name or `*`.
    pub tool: String,
    pub path_pattern: String,
    pub command_pattern: String,
    pub always_allow: bool,
    pub enabled: bool,
}

impl Default for PermissionPattern {
    fn default() -> Self {
        Self {
            tool: String::new(),
            path_pattern: String::new(),
            command_pattern: String::new(),
            always_allow: false,
            enabled: true,
        }
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            auto_approve_safe: true,
            auto_approve_read: false,
            require_approval_write: true,
            require_approval_execute: true,
            require_approval_network: true,
            blocked_commands: vec![
                "rm -rf /".to_string(),
                "dd if=".to_string(),
                "mkfs".to_string(),
                ":(){ :|:& };:".to_string(),
                "> /dev/sda".to_string(),
            ],
            always_allow_patterns: Vec::new(),
            restrict_to_working_dir: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: crate::ollama::DEFAULT_OLLAMA_URL.to_string(),
            default_model: String::new(),
            benchmark_tasks: default_benchmark_tasks(),
            system_prompts: default_system_prompts(),
            model_capabilities: BTreeMap::new(),
            model_as_tools: Vec::new(),
            permissions: PermissionConfig::default(),
            disabled_tools: Vec::new(),
            custom_tools: Vec::new(),
            mcp_servers: Vec::new(),
        }
    }
}

impl Config {
    pub fn capability(&self, model: &str) -> Option<&ModelCapability> {
        self.model_capabilities.get(model)
    }

    /// Unknown models fall back to the line-prefixed convention, the
    /// simplest format a model can follow without structured support.
    pub fn tool_call_format(&self, model: &str) -> ToolCallFormat {
        self.capability(model)
            .map(|c| c.tool_call_format)
            .unwrap_or(ToolCallFormat::LinePrefixed)
    }

    pub fn supports_tools(&self, model: &str) -> bool {
        self.capability(model).map(|c| c.supports_tools).unwrap_or(false)
    }

    /// Appends an always-allow pattern unless an identical one exists.
    /// Returns whether the config changed.
    pub fn add_always_allow_pattern(&mut self, pattern: PermissionPattern) -> bool {
        let exists = self.permissions.always_allow_patterns.iter().any(|p| {
            p.tool == pattern.tool
                && p.path_pattern == pattern.path_pattern
                && p.command_pattern == pattern.command_pattern
                && p.always_allow == pattern.always_allow
        });
        if exists {
            return false;
        }
        self.permissions.always_allow_patterns.push(pattern);
        true
    }
}

pub fn default_config_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set; cannot locate config directory"))?;
    Ok(home.join(".config").join("hearth"))
}

/// Read-mostly store over the persisted configuration. All mutation funnels
/// through `update`, which rewrites the file atomically while holding the
/// write lock, so concurrent writers serialise.
pub struct ConfigStore {
    dir: PathBuf,
    state: RwLock<Config>,
}

impl ConfigStore {
    pub fn load_or_create(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse config at {}", path.display()))?
        } else {
            let def = Config::default();
            write_atomic(&path, &def)?;
            def
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(config),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn snapshot(&self) -> Config {
        self.state
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn update<F>(&self, mutate: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = self
            .state
            .write()
            .map_err(|_| anyhow!("config store lock poisoned"))?;
        mutate(&mut guard);
        write_atomic(&self.path(), &guard)
    }
}

fn write_atomic(path: &Path, config: &Config) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("config path has no parent directory"))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create config dir {}", parent.display()))?;
    let data = serde_json::to_string_pretty(config).context("failed to serialize config")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)
        .with_context(|| format!("failed to write config temp file {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace config at {}", path.display()))?;
    Ok(())
}

fn default_benchmark_tasks() -> Vec<BenchmarkTask> {
    vec![
        BenchmarkTask {
            name: "code_generation".to_string(),
            description: "Generate a simple function".to_string(),
            prompt: "Write a Python function that reverses a string. Only provide the code, no explanation.".to_string(),
            category: TaskCategory::Coding,
        },
        BenchmarkTask {
            name: "code_explanation".to_string(),
            description: "Explain code".to_string(),
            prompt: "Explain what this does in 2-3 sentences: def fib(n): return n if n <= 1 else fib(n-1) + fib(n-2)".to_string(),
            category: TaskCategory::Coding,
        },
        BenchmarkTask {
            name: "reasoning".to_string(),
            description: "Logical reasoning".to_string(),
            prompt: "If all roses are flowers and some flowers fade quickly, can we conclude that some roses fade quickly? Explain your reasoning briefly.".to_string(),
            category: TaskCategory::Reasoning,
        },
        BenchmarkTask {
            name: "tool_use".to_string(),
            description: "Understanding tool usage".to_string(),
            prompt: "If you needed to check the weather in London, describe step-by-step what you would do.".to_string(),
            category: TaskCategory::ToolUse,
        },
        BenchmarkTask {
            name: "creative_writing".to_string(),
            description: "Creative writing ability".to_string(),
            prompt: "Write a haiku about programming.".to_string(),
            category: TaskCategory::Creative,
        },
    ]
}

fn default_system_prompts() -> BTreeMap<String, String> {
    let mut prompts = BTreeMap::new();
    prompts.insert(
        "default".to_string(),
        "You are a helpful coding assistant with access to tools.\n\n\
         Available tools:\n{{TOOLS}}\n\n\
         Use these tools proactively when they would help answer the user's question. For example:\n\
         - If asked about code in files, read them first with read_file\n\
         - If asked to create or modify files, use write_file\n\
         - If you need to check directory contents, use list_files\n\
         - If you need information from the web, use web_fetch\n\
         - If you need to run commands or check system state, use run_command\n\n\
         Always explain what you're doing when using tools."
            .to_string(),
    );
    prompts.insert(
        "tool_tagged".to_string(),
        "You are a helpful coding assistant. When you need to use a tool, respond with XML tags like this:\n\
         <tool_call>\n<name>tool_name</name>\n<arguments>\n{\"arg1\": \"value1\"}\n</arguments>\n</tool_call>\n\n\
         Available tools:\n{{TOOLS}}\n\n\
         Use tools when appropriate to help answer questions. After the tool returns results, continue with your response."
            .to_string(),
    );
    prompts.insert(
        "tool_fenced_json".to_string(),
        "You are a helpful coding assistant. When you need to use a tool, respond with a JSON block like this:\n\
         ```json\n{\"tool_call\": {\"name\": \"tool_name\", \"arguments\": {\"arg1\": \"value1\"}}}\n```\n\n\
         Available tools:\n{{TOOLS}}\n\n\
         Use tools when appropriate. After receiving tool results, provide your final answer."
            .to_string(),
    );
    prompts.insert(
        "tool_line_prefixed".to_string(),
        "You are a helpful coding assistant. When you need to use a tool, write it exactly like this:\n\
         USE_TOOL: tool_name\nARGS: {\"arg1\": \"value1\"}\n\n\
         Available tools:\n{{TOOLS}}\n\n\
         Use tools when needed to help answer the user's questions."
            .to_string(),
    );
    prompts
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{Config, ConfigStore, ModelCapability, PermissionPattern};
    use crate::dialect::ToolCallFormat;

    #[test]
    fn defaults_include_all_dialect_prompts() {
        let cfg = Config::default();
        for key in ["default", "tool_tagged", "tool_fenced_json", "tool_line_prefixed"] {
            let prompt = cfg.system_prompts.get(key).expect(key);
            assert!(prompt.contains("{{TOOLS}}"), "{key} is missing the marker");
        }
    }

    #[test]
    fn unknown_model_defaults_to_line_prefixed() {
        let cfg = Config::default();
        assert_eq!(cfg.tool_call_format("mystery"), ToolCallFormat::LinePrefixed);
        assert!(!cfg.supports_tools("mystery"));
    }

    #[test]
    fn store_creates_default_file_and_round_trips() {
        let tmp = tempdir().expect("tempdir");
        let store = ConfigStore::load_or_create(tmp.path()).expect("create");
        assert!(store.path().exists());

        store
            .update(|c| {
                c.default_model = "llama3".to_string();
                c.model_capabilities.insert(
                    "llama3".to_string(),
                    ModelCapability {
                        supports_tools: true,
                        tool_call_format: ToolCallFormat::Native,
                        recommended_for: Vec::new(),
                    },
                );
            })
            .expect("update");

        let reloaded = ConfigStore::load_or_create(tmp.path()).expect("reload");
        let cfg = reloaded.snapshot();
        assert_eq!(cfg.default_model, "llama3");
        assert_eq!(cfg.tool_call_format("llama3"), ToolCallFormat::Native);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join(super::CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{"ollama_url":"http://localhost:11434","future_field":{"x":1}}"#,
        )
        .expect("write");
        let store = ConfigStore::load_or_create(tmp.path()).expect("load");
        assert_eq!(store.snapshot().ollama_url, "http://localhost:11434");
    }

    #[test]
    fn always_allow_insert_deduplicates() {
        let mut cfg = Config::default();
        let pattern = PermissionPattern {
            tool: "run_command".to_string(),
            command_pattern: "ls".to_string(),
            ..PermissionPattern::default()
        };
        assert!(cfg.add_always_allow_pattern(pattern.clone()));
        assert!(!cfg.add_always_allow_pattern(pattern));
        assert_eq!(cfg.permissions.always_allow_patterns.len(), 1);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let tmp = tempdir().expect("tempdir");
        let store = ConfigStore::load_or_create(tmp.path()).expect("create");
        store.update(|c| c.default_model = "m".to_string()).expect("update");
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
