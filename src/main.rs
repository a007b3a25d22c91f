use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::io::BufReader;

use hearth::acp::AcpServer;
use hearth::bench::background::BackgroundBenchmark;
use hearth::bench::Benchmarker;
use hearth::chat::repl::run_chat_repl;
use hearth::cli_args::Cli;
use hearth::config::{default_config_dir, ConfigStore};
use hearth::ollama::{ModelBackend, OllamaClient};
use hearth::startup::{build_registry, first_run_setup, run_benchmark_foreground};
use hearth::tools::gate::AutoApproveChecker;
use hearth::tools::shell::CaptureExecutor;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => default_config_dir()?,
    };
    let store = Arc::new(ConfigStore::load_or_create(&config_dir)?);

    let base_url = cli
        .ollama_url
        .clone()
        .unwrap_or_else(|| store.snapshot().ollama_url.clone());
    let backend: Arc<dyn ModelBackend> = Arc::new(OllamaClient::new(&base_url)?);
    if !backend.is_available().await {
        return Err(anyhow!(
            "Ollama is not available at {base_url}. Please ensure Ollama is running"
        ));
    }

    if cli.list_models {
        return list_models(&backend, &store).await;
    }

    let needs_setup = store.snapshot().default_model.is_empty();
    if cli.setup || cli.benchmark {
        if needs_setup {
            println!("Welcome to hearth!");
            println!("Running first-time setup to detect and benchmark your models...");
        } else if cli.benchmark {
            println!("Re-running benchmarks...");
        } else {
            println!("Running setup...");
        }
        run_benchmark_foreground(Arc::clone(&backend), &store, cli.evaluator_model.clone())
            .await
            .context("setup failed")?;
        if cli.benchmark && !needs_setup {
            println!("Benchmarks complete.");
            return Ok(());
        }
    } else if needs_setup {
        let selected = first_run_setup(Arc::clone(&backend), &store).await?;
        println!("Selected {selected} as your default model.");
        println!("Full benchmarking will run in the background to evaluate all models.");
    }

    let model = match &cli.model {
        Some(model) => {
            println!("Using model: {model}");
            model.clone()
        }
        None => store.snapshot().default_model.clone(),
    };
    if model.is_empty() {
        return Err(anyhow!(
            "no default model configured. Run with --setup or specify --model"
        ));
    }

    let background = if needs_setup && !cli.setup && !cli.benchmark && !cli.no_background_benchmark
    {
        let config = store.snapshot();
        let mut benchmarker = Benchmarker::new(Arc::clone(&backend), config.benchmark_tasks);
        let evaluator = cli.evaluator_model.clone().unwrap_or_else(|| model.clone());
        benchmarker.set_evaluator(&evaluator);
        Some(BackgroundBenchmark::start(benchmarker, Arc::clone(&store)))
    } else {
        None
    };

    if cli.acp {
        // Stdout carries the protocol; status goes to stderr. The editor
        // owns approvals in this mode.
        let build = build_registry(
            Arc::clone(&backend),
            Arc::clone(&store),
            Arc::new(AutoApproveChecker),
            Arc::new(CaptureExecutor),
        )
        .await;
        let _servers = build.servers;
        let mut server = AcpServer::new(backend, store, build.registry, cli.log_file.clone())?;
        eprintln!("hearth editor-protocol server started");
        return server
            .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await;
    }

    run_chat_repl(backend, store, model, background, cli.log_file.clone()).await
}

async fn list_models(backend: &Arc<dyn ModelBackend>, store: &Arc<ConfigStore>) -> anyhow::Result<()> {
    let models = backend.list_models().await.context("list models")?;
    let config = store.snapshot();
    println!("Available models:\n");
    for model in models {
        println!("{}", model.name);
        if let Some(cap) = config.capability(&model.name) {
            println!("   tool support: {}", cap.supports_tools);
            println!("   tool format:  {}", cap.tool_call_format);
            if !cap.recommended_for.is_empty() {
                let best: Vec<String> =
                    cap.recommended_for.iter().map(|c| c.to_string()).collect();
                println!("   best for:     {}", best.join(", "));
            }
        } else {
            println!("   (not yet benchmarked - run with --benchmark to evaluate)");
        }
        if model.name == config.default_model {
            println!("   [default model]");
        }
        println!();
    }
    Ok(())
}
