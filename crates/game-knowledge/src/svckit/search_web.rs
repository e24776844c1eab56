//! Search Web Tool
//!
//! Web search for games the local catalog does not cover.

use std::sync::Arc;

use async_trait::async_trait;
use udaplay_core::{
    retrieval::{RetrievalGateway, SourceSet},
    tool::{OutputSchema, ParamType, ParameterSchema, ToolArguments, ToolOutput, ToolSpec},
    Result as CoreResult, Tool,
};

pub struct SearchWebTool {
    gateway: Arc<RetrievalGateway>,
}

impl SearchWebTool {
    pub fn new(gateway: Arc<RetrievalGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for SearchWebTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_web".into(),
            description: "Search the web for video game information. Use when retrieve_game finds nothing useful."
                .into(),
            parameters: vec![ParameterSchema::required(
                "query",
                ParamType::String,
                "Search query, e.g. 'Chrono Trigger release date'",
            )],
            output: OutputSchema::Evidence,
            idempotent: true,
        }
    }

    async fn execute(&self, arguments: &ToolArguments) -> CoreResult<ToolOutput> {
        let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let evidence = self.gateway.retrieve(query, SourceSet::web()).await?;

        let mut payload = format!("Web results for '{query}':");
        for (rank, e) in evidence.iter().enumerate() {
            payload.push_str(&format!("\n{}. {}", rank + 1, e.source_id));
        }
        Ok(ToolOutput::with_evidence(payload, evidence))
    }
}
