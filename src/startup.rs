use std::sync::Arc;

use anyhow::{anyhow, Context};

use crate::bench::detector::CapabilityDetector;
use crate::bench::{rank_scores, save_results, Benchmarker, RESULTS_FILE};
use crate::config::ConfigStore;
use crate::mcp::wrapper::McpServerSet;
use crate::ollama::ModelBackend;
use crate::tools::custom::CustomCommandTool;
use crate::tools::fs::{ListFilesTool, ReadFileTool, WriteFileTool};
use crate::tools::gate::{gated, PermissionChecker, PermissionLevel};
use crate::tools::http::WebFetchTool;
use crate::tools::model::AskModelTool;
use crate::tools::shell::{CommandExecutor, RunCommandTool};
use crate::tools::Registry;

/// The wired tool surface for one front-end. The server set must stay alive
/// as long as the registry: dropping it kills the child processes behind
/// the `ext_` tools.
pub struct RegistryBuild {
    pub registry: Registry,
    pub servers: McpServerSet,
}

/// Registers the built-in tools, configured custom and sub-model tools, and
/// every enabled external tool server, each behind a permission gate wired
/// to the given checker.
pub async fn build_registry(
    backend: Arc<dyn ModelBackend>,
    store: Arc<ConfigStore>,
    checker: Arc<dyn PermissionChecker>,
    executor: Arc<dyn CommandExecutor>,
) -> RegistryBuild {
    let config = store.snapshot();
    let registry = Registry::new();

    registry.register(gated(
        Arc::new(ReadFileTool),
        PermissionLevel::Read,
        Arc::clone(&checker),
        Arc::clone(&store),
    ));
    registry.register(gated(
        Arc::new(WriteFileTool),
        PermissionLevel::Write,
        Arc::clone(&checker),
        Arc::clone(&store),
    ));
    registry.register(gated(
        Arc::new(ListFilesTool),
        PermissionLevel::Read,
        Arc::clone(&checker),
        Arc::clone(&store),
    ));
    registry.register(gated(
        Arc::new(WebFetchTool::new()),
        PermissionLevel::Network,
        Arc::clone(&checker),
        Arc::clone(&store),
    ));
    registry.register(gated(
        Arc::new(RunCommandTool::new(executor)),
        PermissionLevel::Execute,
        Arc::clone(&checker),
        Arc::clone(&store),
    ));

    for entry in config.model_as_tools.iter().filter(|m| m.enabled) {
        registry.register(gated(
            Arc::new(AskModelTool::new(
                Arc::clone(&backend),
                &entry.model_name,
                &entry.description,
            )),
            PermissionLevel::Safe,
            Arc::clone(&checker),
            Arc::clone(&store),
        ));
    }

    for spec in &config.custom_tools {
        registry.register(gated(
            Arc::new(CustomCommandTool::new(spec.clone())),
            PermissionLevel::Execute,
            Arc::clone(&checker),
            Arc::clone(&store),
        ));
    }

    let mut servers = McpServerSet::new();
    for server_config in config.mcp_servers.iter().filter(|s| s.enabled) {
        match servers.connect(server_config).await {
            Ok(tools) => {
                for tool in tools {
                    registry.register(gated(
                        tool,
                        PermissionLevel::Network,
                        Arc::clone(&checker),
                        Arc::clone(&store),
                    ));
                }
                eprintln!("connected to tool server: {}", server_config.name);
            }
            Err(e) => {
                eprintln!(
                    "WARN: failed to start tool server {}: {e}",
                    server_config.name
                );
            }
        }
    }

    RegistryBuild { registry, servers }
}

/// First run with no configured model: take the first installed one, probe
/// its dialect, and persist both. Full benchmarking refines this later.
pub async fn first_run_setup(
    backend: Arc<dyn ModelBackend>,
    store: &Arc<ConfigStore>,
) -> anyhow::Result<String> {
    let models = backend.list_models().await.context("list models")?;
    let first = models
        .first()
        .ok_or_else(|| anyhow!("no local models installed; pull one first"))?;
    let model = first.name.clone();

    let detector = CapabilityDetector::new(Arc::clone(&backend));
    let capability = detector.detect(&model, None).await;
    store.update(|c| {
        c.default_model = model.clone();
        c.model_capabilities.insert(model.clone(), capability.clone());
    })?;
    Ok(model)
}

/// Foreground benchmark run: scores every installed model, updates the
/// configuration and writes the results file. Progress prints as it
/// arrives.
pub async fn run_benchmark_foreground(
    backend: Arc<dyn ModelBackend>,
    store: &Arc<ConfigStore>,
    evaluator_model: Option<String>,
) -> anyhow::Result<()> {
    let config = store.snapshot();
    let mut benchmarker = Benchmarker::new(Arc::clone(&backend), config.benchmark_tasks.clone());
    let evaluator = evaluator_model
        .filter(|m| !m.is_empty())
        .or_else(|| {
            if config.default_model.is_empty() {
                None
            } else {
                Some(config.default_model.clone())
            }
        });
    if let Some(evaluator) = evaluator {
        benchmarker.set_evaluator(&evaluator);
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel(100);
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{line}");
        }
    });
    let mut scores = benchmarker.benchmark_all(Some(&tx)).await?;
    drop(tx);
    let _ = printer.await;

    rank_scores(&mut scores);
    store.update(|c| benchmarker.update_config(c, &scores))?;
    let results_path = store.dir().join(RESULTS_FILE);
    save_results(&scores, &results_path)?;

    println!();
    for score in &scores {
        println!(
            "#{} {}  score={:.2}  latency={}ms  tools={}  {}",
            score.rank,
            score.model,
            score.total_score,
            score.avg_latency_ms,
            score.capability.supports_tools,
            score.description
        );
    }
    println!("Results saved to: {}", results_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::{build_registry, first_run_setup};
    use crate::config::ConfigStore;
    use crate::dialect::ToolCallFormat;
    use crate::ollama::{ModelInfo, ScriptedBackend};
    use crate::tools::custom::CustomToolSpec;
    use crate::tools::gate::AutoApproveChecker;
    use crate::tools::shell::CaptureExecutor;

    #[tokio::test]
    async fn registry_contains_builtins_and_custom_tools() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        store
            .update(|c| {
                c.custom_tools.push(CustomToolSpec {
                    name: "word_count".to_string(),
                    description: "Counts words".to_string(),
                    command: "wc -w".to_string(),
                    params: Vec::new(),
                });
            })
            .expect("update");
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let build = build_registry(
            backend,
            store,
            Arc::new(AutoApproveChecker),
            Arc::new(CaptureExecutor),
        )
        .await;

        for expected in ["read_file", "write_file", "list_files", "web_fetch", "run_command", "word_count"]
        {
            assert!(build.registry.get(expected).is_some(), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn first_run_picks_and_probes_the_first_model() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        // Three probe refusals: the model lands on line_prefixed.
        let backend = Arc::new(
            ScriptedBackend::new(vec![
                ScriptedBackend::text_response("no"),
                ScriptedBackend::text_response("no"),
                ScriptedBackend::text_response("no"),
            ])
            .with_models(vec![ModelInfo {
                name: "starter".to_string(),
                size: 0,
                modified_at: None,
            }]),
        );
        let model = first_run_setup(backend, &store).await.expect("setup");
        assert_eq!(model, "starter");
        let config = store.snapshot();
        assert_eq!(config.default_model, "starter");
        assert_eq!(
            config.tool_call_format("starter"),
            ToolCallFormat::LinePrefixed
        );
    }

    #[tokio::test]
    async fn first_run_with_no_models_errors() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let err = first_run_setup(backend, &store).await.expect_err("empty");
        assert!(err.to_string().contains("no local models"));
    }
}
