//! Retrieval Evaluation
//!
//! Judges whether retrieved documents are enough to answer a question.
//! Two evaluators: an LLM judge and a keyword-overlap heuristic for
//! offline use.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use udaplay_core::{GenerationOptions, LlmProvider, Message};

use crate::error::{KnowledgeError, Result};

/// Verdict on a set of retrieved documents
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Whether the documents are enough to answer
    pub useful: bool,

    /// What is present or missing
    pub description: String,
}

/// Retrieval evaluator (Strategy pattern)
#[async_trait]
pub trait RetrievalEvaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, question: &str, documents: &str) -> Result<EvaluationReport>;
}

const JUDGE_PROMPT: &str = r#"You evaluate whether retrieved documents are sufficient to answer a user's question about video games.

Reply with exactly one JSON object:
{"useful": true or false, "description": "what the documents cover and what is missing"}

Be strict: the documents are useful only if they contain the specific fact asked for."#;

/// Asks the model for a verdict
pub struct LlmJudgeEvaluator {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
}

impl LlmJudgeEvaluator {
    pub fn new(provider: Arc<dyn LlmProvider>, options: GenerationOptions) -> Self {
        Self { provider, options }
    }

    fn parse_verdict(content: &str) -> Result<EvaluationReport> {
        let json = content
            .find('{')
            .zip(content.rfind('}'))
            .filter(|(start, end)| end > start)
            .map(|(start, end)| &content[start..=end])
            .ok_or_else(|| KnowledgeError::Evaluation("judge reply contained no JSON object".into()))?;
        serde_json::from_str(json).map_err(|e| KnowledgeError::Evaluation(format!("unreadable judge verdict: {e}")))
    }
}

#[async_trait]
impl RetrievalEvaluator for LlmJudgeEvaluator {
    fn name(&self) -> &str {
        "llm-judge"
    }

    async fn evaluate(&self, question: &str, documents: &str) -> Result<EvaluationReport> {
        let messages = [
            Message::system(JUDGE_PROMPT),
            Message::user(format!("Question:\n{question}\n\nDocuments:\n{documents}")),
        ];
        let completion = self.provider.complete(&messages, &self.options).await?;
        let report = Self::parse_verdict(&completion.content)?;
        tracing::debug!(useful = report.useful, "retrieval judged");
        Ok(report)
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "was", "were", "what", "when", "which", "who", "how", "did", "does", "are", "with", "from",
    "that", "this", "about", "game", "tell",
];

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Share of question keywords that appear in the documents
pub struct KeywordOverlapEvaluator {
    threshold: f32,
}

impl Default for KeywordOverlapEvaluator {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl KeywordOverlapEvaluator {
    /// `threshold` is clamped to [0, 1]
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl RetrievalEvaluator for KeywordOverlapEvaluator {
    fn name(&self) -> &str {
        "keyword-overlap"
    }

    #[allow(clippy::cast_precision_loss)]
    async fn evaluate(&self, question: &str, documents: &str) -> Result<EvaluationReport> {
        let wanted = keywords(question);
        if wanted.is_empty() {
            return Ok(EvaluationReport {
                useful: false,
                description: "The question has no searchable keywords.".into(),
            });
        }
        let present = keywords(documents);
        let (found, missing): (Vec<&String>, Vec<&String>) = wanted.iter().partition(|k| present.contains(*k));
        let coverage = found.len() as f32 / wanted.len() as f32;

        let description = if missing.is_empty() {
            format!("All {} question keywords appear in the documents.", wanted.len())
        } else {
            let missing: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
            format!("{:.0}% keyword coverage; missing: {}.", coverage * 100.0, missing.join(", "))
        };
        Ok(EvaluationReport {
            useful: coverage >= self.threshold,
            description,
        })
    }
}
