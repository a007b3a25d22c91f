use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "hearth",
    version,
    about = "Local agentic coding assistant for Ollama models",
    after_help = "Examples:\n  \
        hearth                          # chat with the default model\n  \
        hearth -m llama3.2              # chat with a specific model\n  \
        hearth -b                       # re-run benchmarks\n  \
        hearth -b --evaluator gpt-oss   # benchmark with model-based scoring\n  \
        hearth -l                       # list models and capabilities\n  \
        hearth --acp                    # run the editor-protocol server"
)]
pub struct Cli {
    /// Override the default model.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Force re-run first-time setup.
    #[arg(short, long, default_value_t = false)]
    pub setup: bool,

    /// Run benchmarks and update the configuration.
    #[arg(short, long, default_value_t = false)]
    pub benchmark: bool,

    /// List available models and their capabilities.
    #[arg(short = 'l', long = "list", default_value_t = false)]
    pub list_models: bool,

    /// Run in editor-protocol server mode on stdio.
    #[arg(long, default_value_t = false)]
    pub acp: bool,

    /// Append structured events to this JSONL file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Model used for evaluating benchmark responses.
    #[arg(long = "evaluator")]
    pub evaluator_model: Option<String>,

    /// Override the Ollama base URL.
    #[arg(long)]
    pub ollama_url: Option<String>,

    /// Use a different configuration directory.
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Skip the first-run background benchmark.
    #[arg(long, default_value_t = false)]
    pub no_background_benchmark: bool,
}
