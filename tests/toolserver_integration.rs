use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use hearth::config::{ConfigStore, McpServerConfig};
use hearth::mcp::wrapper::McpServerSet;
use hearth::ollama::ScriptedBackend;
use hearth::startup::build_registry;
use hearth::tools::gate::AutoApproveChecker;
use hearth::tools::shell::CaptureExecutor;
use hearth::types::ArgMap;

fn stub_bin() -> Option<String> {
    std::env::var("CARGO_BIN_EXE_toolserver_stub").ok()
}

fn stub_config(command: String) -> McpServerConfig {
    McpServerConfig {
        name: "stub".to_string(),
        command,
        args: vec![],
        enabled: true,
    }
}

#[tokio::test]
async fn remote_tools_are_exposed_under_prefixed_names() {
    let Some(stub) = stub_bin() else {
        eprintln!("skipping: CARGO_BIN_EXE_toolserver_stub not set");
        return;
    };
    let mut servers = McpServerSet::new();
    let tools = servers
        .connect(&stub_config(stub))
        .await
        .expect("connect stub");
    let names: Vec<String> = tools.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["ext_stub_echo".to_string()]);
    assert!(tools[0].description().starts_with("[ext: stub]"));
}

#[tokio::test]
async fn invoking_wrapper_routes_original_name_and_concatenates_text() {
    let Some(stub) = stub_bin() else {
        eprintln!("skipping: CARGO_BIN_EXE_toolserver_stub not set");
        return;
    };
    let mut servers = McpServerSet::new();
    let tools = servers
        .connect(&stub_config(stub))
        .await
        .expect("connect stub");

    let mut args = ArgMap::new();
    args.insert("text".to_string(), json!("hi"));
    let output = tools[0].execute(&args).await.expect("call echo");
    // Text parts concatenate; the image part is skipped.
    assert!(output.starts_with("echo:"));
    assert!(output.ends_with(":end"));
    assert!(output.contains("\"text\":\"hi\""));
}

#[tokio::test]
async fn configured_server_lands_in_the_registry() {
    let Some(stub) = stub_bin() else {
        eprintln!("skipping: CARGO_BIN_EXE_toolserver_stub not set");
        return;
    };
    let tmp = tempdir().expect("tempdir");
    let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
    store
        .update(|c| c.mcp_servers.push(stub_config(stub.clone())))
        .expect("update");
    let backend = Arc::new(ScriptedBackend::new(Vec::new()));
    let build = build_registry(
        backend,
        store,
        Arc::new(AutoApproveChecker),
        Arc::new(CaptureExecutor),
    )
    .await;

    let tool = build
        .registry
        .get("ext_stub_echo")
        .expect("external tool registered");
    let mut args = ArgMap::new();
    args.insert("text".to_string(), json!("ping"));
    let output = tool.execute(&args).await.expect("execute through gate");
    assert!(output.contains("ping"));
}
