//! Retrieve Game Tool
//!
//! Semantic search over the ingested game catalog.

use std::sync::Arc;

use async_trait::async_trait;
use udaplay_core::{
    retrieval::{RetrievalGateway, SourceSet},
    tool::{OutputSchema, ParamType, ParameterSchema, ToolArguments, ToolOutput, ToolSpec},
    Result as CoreResult, Tool,
};

/// Tool for looking up games in the local knowledge index
pub struct RetrieveGameTool {
    gateway: Arc<RetrievalGateway>,
}

impl RetrieveGameTool {
    pub fn new(gateway: Arc<RetrievalGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for RetrieveGameTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "retrieve_game".into(),
            description: "Semantic search over the local game catalog. Returns matching games with platform, \
                          release year, genre, publisher and description."
                .into(),
            parameters: vec![
                ParameterSchema::required(
                    "query",
                    ParamType::String,
                    "What to look for, e.g. 'Pokemon Gold and Silver release year'",
                ),
                ParameterSchema::optional(
                    "allow_web",
                    ParamType::Boolean,
                    "Also search the web in the same call (default false)",
                ),
            ],
            output: OutputSchema::Evidence,
            idempotent: true,
        }
    }

    async fn execute(&self, arguments: &ToolArguments) -> CoreResult<ToolOutput> {
        let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let allow_web = arguments
            .get("allow_web")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let sources = if allow_web && self.gateway.web_enabled() {
            SourceSet::both()
        } else {
            SourceSet::local()
        };
        let evidence = self.gateway.retrieve(query, sources).await?;

        let payload = format!("Found {} matching document(s) for '{query}'.", evidence.len());
        Ok(ToolOutput::with_evidence(payload, evidence))
    }
}
