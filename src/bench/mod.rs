pub mod background;
pub mod detector;
pub mod evaluator;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::bench::detector::{report, CapabilityDetector, ProgressSender};
use crate::bench::evaluator::AiEvaluator;
use crate::config::{BenchmarkTask, Config, ModelCapability, TaskCategory};
use crate::ollama::{ChatRequest, ModelBackend};
use crate::types::Message;

pub const RESULTS_FILE: &str = "benchmark_results.json";
pub const PARTIAL_RESULTS_FILE: &str = "benchmark_results_partial.json";

/// A category counts as a strength when its mean task score exceeds this.
const STRENGTH_THRESHOLD: f64 = 0.7;

/// Default-model selection requires tool support plus a total above this.
const DEFAULT_MODEL_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelScore {
    pub model: String,
    pub total_score: f64,
    pub scores: BTreeMap<String, f64>,
    pub avg_latency_ms: u64,
    pub strengths: Vec<TaskCategory>,
    pub description: String,
    pub capability: ModelCapability,
    pub rank: usize,
}

pub struct Benchmarker {
    backend: Arc<dyn ModelBackend>,
    detector: CapabilityDetector,
    evaluator: Option<AiEvaluator>,
    tasks: Vec<BenchmarkTask>,
}

impl Benchmarker {
    pub fn new(backend: Arc<dyn ModelBackend>, tasks: Vec<BenchmarkTask>) -> Self {
        let tasks = if tasks.is_empty() {
            Config::default().benchmark_tasks
        } else {
            tasks
        };
        Self {
            detector: CapabilityDetector::new(Arc::clone(&backend)),
            backend,
            evaluator: None,
            tasks,
        }
    }

    pub fn set_evaluator(&mut self, evaluator_model: &str) {
        if !evaluator_model.is_empty() {
            self.evaluator = Some(AiEvaluator::new(Arc::clone(&self.backend), evaluator_model));
        }
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    pub async fn benchmark_model(
        &self,
        model: &str,
        progress: Option<&ProgressSender>,
    ) -> anyhow::Result<ModelScore> {
        let capability = self.detector.detect(model, progress).await;

        let mut scores = BTreeMap::new();
        let mut category_scores: BTreeMap<TaskCategory, Vec<f64>> = BTreeMap::new();
        let mut total_latency = Duration::ZERO;

        for task in &self.tasks {
            report(
                progress,
                format!("Running '{}' test on {}", task.name, model),
            );
            let started = Instant::now();
            let result = self
                .backend
                .chat(ChatRequest {
                    model: model.to_string(),
                    messages: vec![Message::user(task.prompt.clone())],
                    tools: None,
                })
                .await;
            let latency = started.elapsed();
            total_latency += latency;

            let response = match result {
                Ok(resp) => resp.message.content,
                Err(e) => {
                    scores.insert(task.name.clone(), 0.0);
                    report(progress, format!("  failed: {e}"));
                    continue;
                }
            };

            let task_score = match &self.evaluator {
                Some(evaluator) => match evaluator.evaluate_response(task, &response).await {
                    Ok((score, reasoning)) => {
                        report(progress, format!("  Score: {score:.2} - {reasoning}"));
                        score
                    }
                    Err(e) => {
                        report(
                            progress,
                            format!("  evaluation failed, using fallback: {e}"),
                        );
                        heuristic_score(&response, latency)
                    }
                },
                None => {
                    let score = heuristic_score(&response, latency);
                    report(progress, format!("  Score: {score:.2}"));
                    score
                }
            };
            scores.insert(task.name.clone(), task_score);
            category_scores
                .entry(task.category)
                .or_default()
                .push(task_score);
        }

        let strengths: Vec<TaskCategory> = category_scores
            .iter()
            .filter(|(_, values)| average(values) > STRENGTH_THRESHOLD)
            .map(|(category, _)| *category)
            .collect();

        let total_score = average(&scores.values().copied().collect::<Vec<_>>());
        let avg_latency_ms = if self.tasks.is_empty() {
            0
        } else {
            (total_latency.as_millis() as u64) / (self.tasks.len() as u64)
        };

        let mut score = ModelScore {
            model: model.to_string(),
            total_score,
            scores,
            avg_latency_ms,
            strengths,
            description: String::new(),
            capability,
            rank: 0,
        };

        score.description = match &self.evaluator {
            Some(evaluator) => {
                report(progress, format!("Generating description for {model}..."));
                match evaluator.generate_model_description(&score).await {
                    Ok(desc) => desc,
                    Err(e) => {
                        report(progress, format!("  description generation failed: {e}"));
                        fallback_description(&score)
                    }
                }
            }
            None => fallback_description(&score),
        };

        Ok(score)
    }

    pub async fn benchmark_all(
        &self,
        progress: Option<&ProgressSender>,
    ) -> anyhow::Result<Vec<ModelScore>> {
        let models = self.backend.list_models().await.context("list models")?;
        report(progress, format!("Found {} models to benchmark", models.len()));

        let mut scores = Vec::with_capacity(models.len());
        for model in models {
            report(progress, format!("=== Benchmarking {} ===", model.name));
            match self.benchmark_model(&model.name, progress).await {
                Ok(score) => scores.push(score),
                Err(e) => {
                    report(progress, format!("Error benchmarking {}: {e}", model.name));
                }
            }
        }
        rank_scores(&mut scores);
        Ok(scores)
    }

    /// The best tool-capable model above the quality bar, else the overall
    /// best. Expects ranked (descending) scores.
    pub fn select_best_model(&self, scores: &[ModelScore]) -> Option<String> {
        scores
            .iter()
            .find(|s| s.capability.supports_tools && s.total_score > DEFAULT_MODEL_THRESHOLD)
            .or_else(|| scores.first())
            .map(|s| s.model.clone())
    }

    /// Installs measured capabilities and, when unset, the default model.
    pub fn update_config(&self, config: &mut Config, scores: &[ModelScore]) {
        for score in scores {
            let mut capability = score.capability.clone();
            capability.recommended_for = score.strengths.clone();
            config
                .model_capabilities
                .insert(score.model.clone(), capability);
        }
        if config.default_model.is_empty() {
            if let Some(best) = self.select_best_model(scores) {
                config.default_model = best;
            }
        }
    }
}

pub fn rank_scores(scores: &mut [ModelScore]) {
    scores.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (i, score) in scores.iter_mut().enumerate() {
        score.rank = i + 1;
    }
}

pub fn save_results(scores: &[ModelScore], path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create results dir {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(scores).context("marshal results")?;
    std::fs::write(path, data)
        .with_context(|| format!("failed to write results to {}", path.display()))?;
    Ok(())
}

/// Placeholder scoring used when no evaluator model is configured. The
/// formula is coarse and caps well below 1.0; downstream consumers must not
/// treat it as calibrated.
pub fn heuristic_score(response: &str, latency: Duration) -> f64 {
    let mut score = 0.0;
    if response.len() > 50 {
        score += 0.3;
    }
    if response.len() > 200 {
        score += 0.2;
    }
    if latency < Duration::from_secs(5) {
        score += 0.3;
    } else if latency < Duration::from_secs(10) {
        score += 0.2;
    } else if latency < Duration::from_secs(20) {
        score += 0.1;
    }
    score + 0.2
}

fn fallback_description(score: &ModelScore) -> String {
    if score.strengths.is_empty() {
        return "General purpose model".to_string();
    }
    let listed: Vec<String> = score
        .strengths
        .iter()
        .take(3)
        .map(|c| c.to_string())
        .collect();
    format!("Good for: {}", listed.join(", "))
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
