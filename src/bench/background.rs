use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bench::detector::report;
use crate::bench::{rank_scores, save_results, Benchmarker, ModelScore, PARTIAL_RESULTS_FILE, RESULTS_FILE};
use crate::config::ConfigStore;

const PROGRESS_CAPACITY: usize = 100;

/// Runs the benchmarker on its own task with a private cancellation token.
/// Models are benchmarked one at a time and results persist incrementally,
/// so a cancelled run leaves exactly the completed scores behind.
pub struct BackgroundBenchmark {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    progress_rx: Mutex<mpsc::Receiver<String>>,
    last_progress: Mutex<String>,
}

impl BackgroundBenchmark {
    pub fn start(benchmarker: Benchmarker, store: Arc<ConfigStore>) -> Self {
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let (tx, rx) = mpsc::channel(PROGRESS_CAPACITY);
        let handle = tokio::spawn(async move {
            run(benchmarker, store, worker_cancel, tx).await;
        });
        Self {
            cancel,
            handle,
            progress_rx: Mutex::new(rx),
            last_progress: Mutex::new(String::new()),
        }
    }

    /// Drains pending progress messages without blocking and returns the
    /// most recent one, if any has ever arrived.
    pub fn latest_progress(&self) -> Option<String> {
        let mut last = self.last_progress.lock().ok()?;
        if let Ok(mut rx) = self.progress_rx.lock() {
            while let Ok(msg) = rx.try_recv() {
                *last = msg;
            }
        }
        if last.is_empty() {
            None
        } else {
            Some(last.clone())
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) {
        let _ = self.handle.await;
    }
}

async fn run(
    benchmarker: Benchmarker,
    store: Arc<ConfigStore>,
    cancel: CancellationToken,
    tx: mpsc::Sender<String>,
) {
    let progress = Some(&tx);
    let models = match benchmarker.backend().list_models().await {
        Ok(models) => models,
        Err(e) => {
            report(progress, format!("Failed to list models: {e}"));
            return;
        }
    };
    report(progress, format!("Found {} models to benchmark", models.len()));

    let mut scores: Vec<ModelScore> = Vec::new();
    let mut cancelled = false;
    for model in &models {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        report(progress, format!("=== Benchmarking {} ===", model.name));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            result = benchmarker.benchmark_model(&model.name, progress) => result,
        };
        match outcome {
            Ok(score) => {
                scores.push(score);
                persist(&benchmarker, &store, &mut scores, PARTIAL_RESULTS_FILE, progress);
            }
            Err(e) => {
                report(progress, format!("Error benchmarking {}: {e}", model.name));
            }
        }
    }

    if cancelled {
        report(progress, "Benchmarking interrupted - saving partial results...".to_string());
        persist(&benchmarker, &store, &mut scores, PARTIAL_RESULTS_FILE, progress);
        report(
            progress,
            format!("Partial results saved ({}/{} models)", scores.len(), models.len()),
        );
        return;
    }

    persist(&benchmarker, &store, &mut scores, RESULTS_FILE, progress);
    report(progress, "Background benchmarking complete!".to_string());
}

fn persist(
    benchmarker: &Benchmarker,
    store: &Arc<ConfigStore>,
    scores: &mut Vec<ModelScore>,
    file_name: &str,
    progress: Option<&mpsc::Sender<String>>,
) {
    if scores.is_empty() {
        return;
    }
    rank_scores(scores);
    if let Err(e) = store.update(|cfg| benchmarker.update_config(cfg, scores)) {
        report(progress, format!("Failed to save config: {e}"));
    }
    let path: PathBuf = store.dir().join(file_name);
    if let Err(e) = save_results(scores, &path) {
        report(progress, format!("Failed to save results: {e}"));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::BackgroundBenchmark;
    use crate::bench::{Benchmarker, ModelScore, PARTIAL_RESULTS_FILE, RESULTS_FILE};
    use crate::config::{BenchmarkTask, ConfigStore, TaskCategory};
    use crate::ollama::{ChatRequest, ChatResponse, ModelBackend, ModelInfo};
    use crate::types::Message;

    fn one_task() -> Vec<BenchmarkTask> {
        vec![BenchmarkTask {
            name: "t".to_string(),
            description: "d".to_string(),
            prompt: "p".to_string(),
            category: TaskCategory::General,
        }]
    }

    /// Backend that answers instantly for the first N models, then parks
    /// forever so cancellation lands mid-benchmark.
    struct StallingBackend {
        models: Vec<ModelInfo>,
        stall_after_model: String,
    }

    #[async_trait::async_trait]
    impl ModelBackend for StallingBackend {
        async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
            if req.model == self.stall_after_model {
                // Park until the run is cancelled.
                std::future::pending::<()>().await;
            }
            Ok(ChatResponse {
                message: Message::assistant("x".repeat(300)),
                tool_calls: Vec::new(),
            })
        }

        async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
            Ok(self.models.clone())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn model(name: &str) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            size: 0,
            modified_at: None,
        }
    }

    #[tokio::test]
    async fn completes_and_writes_final_results() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        let backend = Arc::new(StallingBackend {
            models: vec![model("m1")],
            stall_after_model: "never".to_string(),
        });
        let bench = Benchmarker::new(backend, one_task());
        let bg = BackgroundBenchmark::start(bench, Arc::clone(&store));
        bg.wait().await;

        let results = std::fs::read_to_string(tmp.path().join(RESULTS_FILE)).expect("results");
        let scores: Vec<ModelScore> = serde_json::from_str(&results).expect("parse");
        assert_eq!(scores.len(), 1);
        assert!(store.snapshot().capability("m1").is_some());
        assert_eq!(store.snapshot().default_model, "m1");
    }

    #[tokio::test]
    async fn cancellation_preserves_partial_results() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        let backend = Arc::new(StallingBackend {
            models: vec![model("m1"), model("m2"), model("m3")],
            stall_after_model: "m3".to_string(),
        });
        let bench = Benchmarker::new(backend, one_task());
        let bg = BackgroundBenchmark::start(bench, Arc::clone(&store));

        // Let the first two models complete, then cancel mid-third.
        let partial_path = tmp.path().join(PARTIAL_RESULTS_FILE);
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Ok(content) = std::fs::read_to_string(&partial_path) {
                if let Ok(scores) = serde_json::from_str::<Vec<ModelScore>>(&content) {
                    if scores.len() == 2 {
                        break;
                    }
                }
            }
        }
        bg.cancel();
        bg.wait().await;

        let content = std::fs::read_to_string(&partial_path).expect("partial results");
        let scores: Vec<ModelScore> = serde_json::from_str(&content).expect("parse");
        assert_eq!(scores.len(), 2, "exactly the completed models persist");
        assert!(!tmp.path().join(RESULTS_FILE).exists());
        let config = store.snapshot();
        assert!(config.capability("m1").is_some());
        assert!(config.capability("m2").is_some());
        assert!(config.capability("m3").is_none());
    }

    #[tokio::test]
    async fn progress_is_observable_without_blocking() {
        let tmp = tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::load_or_create(tmp.path()).expect("store"));
        let backend = Arc::new(StallingBackend {
            models: vec![model("m1")],
            stall_after_model: "never".to_string(),
        });
        let bench = Benchmarker::new(backend, one_task());
        let bg = BackgroundBenchmark::start(bench, store);
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if bg.is_finished() {
                break;
            }
        }
        assert!(bg.latest_progress().is_some());
        bg.wait().await;
    }
}
