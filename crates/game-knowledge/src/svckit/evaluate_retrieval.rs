//! Evaluate Retrieval Tool
//!
//! Lets the model ask whether what it retrieved actually answers the
//! question before committing to an answer.

use std::sync::Arc;

use async_trait::async_trait;
use udaplay_core::{
    tool::{OutputSchema, ParamType, ParameterSchema, ToolArguments, ToolOutput, ToolSpec},
    Result as CoreResult, Tool,
};

use crate::evaluation::RetrievalEvaluator;

pub struct EvaluateRetrievalTool {
    evaluator: Arc<dyn RetrievalEvaluator>,
}

impl EvaluateRetrievalTool {
    pub fn new(evaluator: Arc<dyn RetrievalEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl Tool for EvaluateRetrievalTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "evaluate_retrieval".into(),
            description: "Judge whether retrieved documents are enough to answer the question. \
                          Returns {useful, description}."
                .into(),
            parameters: vec![
                ParameterSchema::required("question", ParamType::String, "The user's original question"),
                ParameterSchema::required("documents", ParamType::String, "The retrieved text to judge"),
            ],
            output: OutputSchema::Evaluation,
            idempotent: true,
        }
    }

    async fn execute(&self, arguments: &ToolArguments) -> CoreResult<ToolOutput> {
        let question = arguments.get("question").and_then(|v| v.as_str()).unwrap_or_default();
        let documents = arguments.get("documents").and_then(|v| v.as_str()).unwrap_or_default();

        let report = self.evaluator.evaluate(question, documents).await?;
        let verdict = if report.useful { "useful" } else { "not useful" };
        let payload = format!("Documents are {verdict}. {}", report.description);
        Ok(ToolOutput::evaluation(payload, serde_json::to_value(&report)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use udaplay_core::{ToolCall, ToolRegistry};

    use crate::evaluation::KeywordOverlapEvaluator;

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools
            .register(EvaluateRetrievalTool::new(Arc::new(KeywordOverlapEvaluator::default())))
            .unwrap();
        tools
    }

    #[tokio::test]
    async fn test_evaluation_output_shape() {
        let call = ToolCall::new(
            "evaluate_retrieval",
            serde_json::from_value(json!({
                "question": "When was Super Mario 64 released?",
                "documents": "[Nintendo 64] Super Mario 64 (1996) - A 3D platformer."
            }))
            .unwrap(),
        );
        let result = registry().dispatch(&call, None).await;
        assert!(result.is_success());
        assert!(result.observation().contains("Documents are useful"));
    }

    #[tokio::test]
    async fn test_missing_documents_rejected() {
        let call = ToolCall::new(
            "evaluate_retrieval",
            serde_json::from_value(json!({ "question": "When was Doom released?" })).unwrap(),
        );
        let result = registry().dispatch(&call, None).await;
        assert_eq!(result.failure_kind(), Some(udaplay_core::tool::FailureKind::InvalidArguments));
    }
}
