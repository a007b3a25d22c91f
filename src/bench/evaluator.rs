use std::sync::Arc;

use anyhow::Context;

use crate::bench::ModelScore;
use crate::config::BenchmarkTask;
use crate::ollama::{ChatRequest, ModelBackend};
use crate::types::Message;

/// Scores benchmark responses with a separate evaluator model prompted with
/// a strict rubric.
pub struct AiEvaluator {
    backend: Arc<dyn ModelBackend>,
    evaluator_model: String,
}

impl AiEvaluator {
    pub fn new(backend: Arc<dyn ModelBackend>, evaluator_model: &str) -> Self {
        Self {
            backend,
            evaluator_model: evaluator_model.to_string(),
        }
    }

    pub async fn evaluate_response(
        &self,
        task: &BenchmarkTask,
        response: &str,
    ) -> anyhow::Result<(f64, String)> {
        let prompt = format!(
            "You are evaluating an LLM's response to a task. Rate the response on a scale of 0.0 to 1.0.\n\n\
             Task Category: {}\n\
             Task Description: {}\n\
             Task Prompt: {}\n\n\
             Model's Response:\n{}\n\n\
             Evaluate this response based on:\n\
             - Correctness and accuracy\n\
             - Completeness\n\
             - Clarity and coherence\n\
             - Appropriateness for the task category\n\n\
             Respond in this exact format:\n\
             SCORE: [number between 0.0 and 1.0]\n\
             REASONING: [brief explanation]\n\n\
             Be strict but fair. Only exceptional responses should score above 0.9.",
            task.category, task.description, task.prompt, response
        );
        let resp = self
            .backend
            .chat(ChatRequest {
                model: self.evaluator_model.clone(),
                messages: vec![Message::user(prompt)],
                tools: None,
            })
            .await
            .context("chat with evaluator")?;
        Ok(parse_evaluation(&resp.message.content))
    }

    /// One-sentence human-readable description of the model's best use.
    pub async fn generate_model_description(&self, score: &ModelScore) -> anyhow::Result<String> {
        let strengths = if score.strengths.is_empty() {
            "general purpose".to_string()
        } else {
            score
                .strengths
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let prompt = format!(
            "Based on these benchmark results, write a concise one-sentence description of this model's best use cases.\n\n\
             Model: {}\n\
             Overall Score: {:.2}\n\
             Strengths: {}\n\
             Average Latency: {}ms\n\
             Tool Support: {}\n\n\
             Write a single, clear sentence describing when to use this model. Be specific and practical.\n\
             Example format: \"Fast general-purpose model, ideal for coding tasks and quick responses.\"",
            score.model, score.total_score, strengths, score.avg_latency_ms, score.capability.supports_tools
        );
        let resp = self
            .backend
            .chat(ChatRequest {
                model: self.evaluator_model.clone(),
                messages: vec![Message::user(prompt)],
                tools: None,
            })
            .await
            .context("generate description")?;
        let description = resp
            .message
            .content
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
        Ok(description)
    }
}

fn parse_evaluation(content: &str) -> (f64, String) {
    let mut score = 0.0_f64;
    let mut reasoning = String::new();
    for line in content.lines() {
        let line = line.trim();
        if let Some(raw) = line.strip_prefix("SCORE:") {
            if let Ok(parsed) = raw.trim().parse::<f64>() {
                score = parsed;
            }
        }
        if let Some(raw) = line.strip_prefix("REASONING:") {
            reasoning = raw.trim().to_string();
        }
    }
    (score.clamp(0.0, 1.0), reasoning)
}
