use std::collections::BTreeSet;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::agent::{Agent, ToolExecutionRecord};
use crate::bench::background::BackgroundBenchmark;
use crate::chat::coordinator::{ChatCoordinator, SubmitOutcome};
use crate::chat::permission::InteractivePermissionChecker;
use crate::chat::{PendingPermission, PermissionReply, UiUpdate};
use crate::config::ConfigStore;
use crate::ollama::ModelBackend;
use crate::startup::build_registry;
use crate::tools::shell::{CommandStreamEvent, StreamingExecutor, SHELL_TOOL_NAME};
use crate::tools::Registry;

const PROGRESS_POLL: Duration = Duration::from_secs(2);

/// Thin line-based front-end over the coordinator. Anything that renders
/// the same update stream conforms to the same contract.
pub async fn run_chat_repl(
    backend: Arc<dyn ModelBackend>,
    store: Arc<ConfigStore>,
    model: String,
    background: Option<BackgroundBenchmark>,
    log_file: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let checker = Arc::new(InteractivePermissionChecker::new(
        tx.clone(),
        Arc::clone(&store),
    ));
    let stream_tx = tx.clone();
    let executor = Arc::new(StreamingExecutor::new(Arc::new(move |event| {
        let _ = stream_tx.send(UiUpdate::CommandStream(event));
    })));
    let build = build_registry(
        Arc::clone(&backend),
        Arc::clone(&store),
        checker,
        executor,
    )
    .await;
    let registry = build.registry;
    // Dropping the server set would kill the ext_ tool processes.
    let _servers = build.servers;

    let config = store.snapshot();
    let mut agent = Agent::new(Arc::clone(&backend), registry.clone(), &config, &model);
    if let Some(sink) = crate::events::file_sink(log_file.as_deref()) {
        agent.set_event_sink(sink);
    }
    agent.add_system_prompt(None);
    let mut coordinator = ChatCoordinator::from_parts(agent, tx, rx);
    let mut updates = coordinator
        .take_updates()
        .ok_or_else(|| anyhow::anyhow!("update channel already taken"))?;

    println!(
        "hearth chat started (model={} dialect={}).",
        model,
        config.tool_call_format(&model)
    );
    println!("Commands: /help, /models, /model <name>, /tools, /enable, /disable, /queue, /clear-queue, /reset, /stop, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_permission: Option<PendingPermission> = None;
    let mut session_disabled: BTreeSet<String> = BTreeSet::new();
    let mut last_progress = String::new();
    prompt(&coordinator);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim().to_string();
                if input.is_empty() {
                    prompt(&coordinator);
                    continue;
                }

                if let Some(pending) = pending_permission.take() {
                    let reply = parse_permission_reply(&input);
                    let _ = pending.reply.send(reply);
                    continue;
                }

                if let Some(command) = input.strip_prefix('/') {
                    let quit = handle_command(
                        command,
                        &backend,
                        &store,
                        &registry,
                        &mut coordinator,
                        &mut session_disabled,
                        log_file.as_deref(),
                    )
                    .await?;
                    if quit {
                        break;
                    }
                    prompt(&coordinator);
                    continue;
                }

                match coordinator.submit(&input) {
                    SubmitOutcome::Started => {}
                    SubmitOutcome::Queued(depth) => {
                        println!("(queued, {depth} waiting; /stop interrupts the current task)");
                    }
                }
            }
            update = updates.recv() => {
                let Some(update) = update else { break };
                match update {
                    UiUpdate::TurnFinished(report) => {
                        if let Some(error) = report.error {
                            println!("Error: {error}");
                        } else {
                            for record in &report.tool_calls {
                                println!("{}", format_tool_call(record));
                            }
                            if !report.content.is_empty() {
                                println!("Assistant:\n{}", report.content);
                            }
                        }
                        if coordinator.on_turn_finished() {
                            println!("(sending next queued message)");
                        } else {
                            prompt(&coordinator);
                        }
                    }
                    UiUpdate::PermissionPrompt(pending) => {
                        print_permission_panel(&pending);
                        pending_permission = Some(pending);
                    }
                    UiUpdate::CommandStream(event) => print_command_event(&event),
                    UiUpdate::Notice(text) => println!("{text}"),
                }
            }
            _ = tokio::time::sleep(PROGRESS_POLL) => {
                if let Some(bg) = &background {
                    if let Some(progress) = bg.latest_progress() {
                        if progress != last_progress {
                            println!("[benchmark] {progress}");
                            last_progress = progress;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn prompt(coordinator: &ChatCoordinator) {
    if !coordinator.turn_in_flight() {
        print!("You> ");
        let _ = std::io::stdout().flush();
    }
}

async fn handle_command(
    command: &str,
    backend: &Arc<dyn ModelBackend>,
    store: &Arc<ConfigStore>,
    registry: &Registry,
    coordinator: &mut ChatCoordinator,
    session_disabled: &mut BTreeSet<String>,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<bool> {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().unwrap_or_default().to_string();

    match name {
        "quit" | "exit" => return Ok(true),
        "help" => {
            println!("/help            show commands");
            println!("/models          list models and their capabilities");
            println!("/model <name>    switch the active model");
            println!("/tools           list registered tools");
            println!("/enable <tool>   re-enable a tool for this session");
            println!("/disable <tool>  disable a tool for this session");
            println!("/queue           show queued messages");
            println!("/clear-queue     drop queued messages");
            println!("/reset           clear the conversation");
            println!("/stop            interrupt the current task");
            println!("/quit            exit");
        }
        "models" => match backend.list_models().await {
            Ok(models) => {
                let config = store.snapshot();
                for model in models {
                    let mut line = model.name.clone();
                    if let Some(cap) = config.capability(&model.name) {
                        line.push_str(&format!(
                            "  (tools={}, format={})",
                            cap.supports_tools, cap.tool_call_format
                        ));
                    } else {
                        line.push_str("  (not yet benchmarked)");
                    }
                    if model.name == config.default_model {
                        line.push_str("  [default]");
                    }
                    println!("{line}");
                }
            }
            Err(e) => println!("failed to list models: {e}"),
        },
        "model" => {
            if arg.is_empty() {
                println!("usage: /model <name>");
            } else if coordinator.turn_in_flight() {
                println!("a task is running; /stop it before switching models");
            } else {
                let agent_handle = coordinator.agent();
                let mut guard = agent_handle.lock().await;
                store.update(|c| c.default_model = arg.clone())?;
                let config = store.snapshot();
                let mut replacement =
                    Agent::new(Arc::clone(backend), registry.clone(), &config, &arg);
                if let Some(sink) = crate::events::file_sink(log_file) {
                    replacement.set_event_sink(sink);
                }
                replacement.set_disabled_tools(effective_disabled(&config.disabled_tools, session_disabled));
                replacement.add_system_prompt(None);
                *guard = replacement;
                println!(
                    "switched to {} (dialect={})",
                    arg,
                    config.tool_call_format(&arg)
                );
            }
        }
        "tools" => {
            let config = store.snapshot();
            let disabled = effective_disabled(&config.disabled_tools, session_disabled);
            for tool in registry.all() {
                let marker = if disabled.iter().any(|d| *d == tool.name()) {
                    " [disabled]"
                } else {
                    ""
                };
                println!("{}{}  {}", tool.name(), marker, tool.description());
            }
        }
        "disable" | "enable" => {
            if arg.is_empty() {
                println!("usage: /{name} <tool>");
            } else {
                if name == "disable" {
                    session_disabled.insert(arg.clone());
                } else {
                    session_disabled.remove(&arg);
                }
                let config = store.snapshot();
                let disabled = effective_disabled(&config.disabled_tools, session_disabled);
                let agent_handle = coordinator.agent();
                match agent_handle.try_lock() {
                    Ok(mut guard) => guard.set_disabled_tools(disabled),
                    Err(_) => println!("(applies after the current task finishes)"),
                }
                println!("{name}d {arg} for this session");
            }
        }
        "queue" => {
            if coordinator.queue_len() == 0 {
                println!("queue is empty");
            } else {
                println!(
                    "{} queued; next: {}",
                    coordinator.queue_len(),
                    coordinator.queued_preview().unwrap_or_default()
                );
            }
        }
        "clear-queue" => {
            let dropped = coordinator.clear_queue();
            println!("dropped {dropped} queued message(s)");
        }
        "reset" => {
            let agent_handle = coordinator.agent();
            let lock_result = agent_handle.try_lock();
            match lock_result {
                Ok(mut guard) => {
                    guard.clear_history();
                    println!("conversation cleared");
                }
                Err(_) => println!("a task is running; /stop it before resetting"),
            }
        }
        "stop" => {
            let outcome = coordinator.interrupt();
            if outcome.cancelled {
                println!("task interrupted");
            } else {
                println!("nothing to interrupt");
            }
            if outcome.started_next {
                println!("(sending next queued message)");
            }
        }
        other => println!("unknown command: /{other} (try /help)"),
    }
    Ok(false)
}

fn effective_disabled(config_disabled: &[String], session: &BTreeSet<String>) -> Vec<String> {
    let mut disabled: BTreeSet<String> = config_disabled.iter().cloned().collect();
    disabled.extend(session.iter().cloned());
    disabled.into_iter().collect()
}

/// y/n plus the always-allow upgrades: `a` tool-wide, `c` this command
/// word, `p` this path. Anything unrecognised denies.
pub fn parse_permission_reply(input: &str) -> PermissionReply {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => PermissionReply::approve_once(),
        "a" => PermissionReply {
            approved: true,
            always_tool: true,
            ..PermissionReply::default()
        },
        "c" => PermissionReply {
            approved: true,
            always_command: true,
            ..PermissionReply::default()
        },
        "p" => PermissionReply {
            approved: true,
            always_path: true,
            ..PermissionReply::default()
        },
        _ => PermissionReply::deny(),
    }
}

pub fn format_tool_call(record: &ToolExecutionRecord) -> String {
    let args = serde_json::to_string_pretty(&serde_json::Value::Object(record.arguments.clone()))
        .unwrap_or_else(|_| "{}".to_string());
    let mut out = format!("Tool: {}\nArguments:\n{}\n", record.name, args);
    match &record.result {
        Ok(output) => out.push_str(&format!("Result:\n{output}\n")),
        Err(error) => out.push_str(&format!("Error: {error}\n")),
    }
    out
}

fn print_permission_panel(pending: &PendingPermission) {
    let request = &pending.request;
    println!();
    println!(
        "PERMISSION REQUIRED [{}]  tool: {}",
        request.level, request.tool
    );
    println!("  {}", request.details);
    if let Some(target) = &request.target {
        println!("  Target: {target}");
    }
    if request.tool == SHELL_TOOL_NAME {
        println!("  y: once  n: deny  a: always this tool  c: always this command");
    } else if request.target.is_some() {
        println!("  y: once  n: deny  a: always this tool  p: always this path");
    } else {
        println!("  y: once  n: deny  a: always this tool");
    }
    print!("Allow? ");
    let _ = std::io::stdout().flush();
}

fn print_command_event(event: &CommandStreamEvent) {
    match event {
        CommandStreamEvent::Started { id, command } => {
            println!("[cmd {}] $ {}", short_id(id), command);
        }
        CommandStreamEvent::Line { id, line, stderr } => {
            let tag = if *stderr { "!" } else { " " };
            println!("[cmd {}]{tag} {line}", short_id(id));
        }
        CommandStreamEvent::Finished { id, exit_code } => {
            println!(
                "[cmd {}] exited with {}",
                short_id(id),
                exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
            );
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::{effective_disabled, format_tool_call, parse_permission_reply};
    use crate::agent::ToolExecutionRecord;
    use crate::types::ArgMap;

    #[test]
    fn permission_replies_map_keys_to_upgrades() {
        assert!(parse_permission_reply("y").approved);
        assert!(!parse_permission_reply("n").approved);
        assert!(!parse_permission_reply("whatever").approved);
        let always = parse_permission_reply("A");
        assert!(always.approved && always.always_tool);
        let command = parse_permission_reply("c");
        assert!(command.approved && command.always_command);
        let path = parse_permission_reply("p");
        assert!(path.approved && path.always_path);
    }

    #[test]
    fn tool_call_rendering_includes_result_or_error() {
        let mut arguments = ArgMap::new();
        arguments.insert("path".to_string(), serde_json::json!("a.txt"));
        let ok = format_tool_call(&ToolExecutionRecord {
            name: "read_file".to_string(),
            arguments: arguments.clone(),
            result: Ok("contents".to_string()),
        });
        assert!(ok.contains("Tool: read_file"));
        assert!(ok.contains("Result:\ncontents"));

        let failed = format_tool_call(&ToolExecutionRecord {
            name: "read_file".to_string(),
            arguments,
            result: Err("permission denied by user".to_string()),
        });
        assert!(failed.contains("Error: permission denied by user"));
    }

    #[test]
    fn session_disabled_union_is_sorted_and_deduplicated() {
        let config = vec!["b".to_string(), "a".to_string()];
        let mut session = std::collections::BTreeSet::new();
        session.insert("b".to_string());
        session.insert("c".to_string());
        assert_eq!(
            effective_disabled(&config, &session),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
