//! # game-knowledge
//!
//! Video game research domain for the udaplay agent: the game catalog,
//! its ingestion into a vector index, and the tools the agent reasons with.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  "When was Pokemon Gold and Silver released?"               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  retrieve_game      local catalog     → game-003 (0.42)     │
//! │  evaluate_retrieval "is this enough?" → useful              │
//! │  answer             "1999"            → cites game-003      │
//! └─────────────────────────────────────────────────────────────┘
//!
//! Not in the catalog:
//! │  retrieve_game → nothing │ search_web → ranked web snippets
//! ```

pub mod catalog;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod svckit;

#[cfg(test)]
mod scenarios;

use std::sync::Arc;

use udaplay_core::{RetrievalGateway, ToolRegistry};

pub use catalog::{ingest, Catalog, CatalogEntry};
pub use error::{KnowledgeError, Result};
pub use evaluation::{EvaluationReport, KeywordOverlapEvaluator, LlmJudgeEvaluator, RetrievalEvaluator};
pub use model::Game;

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{EvaluateRetrievalTool, RetrieveGameTool, SearchWebTool};
}

/// Registry with the three research tools; `search_web` only when the
/// gateway has a web backend
pub fn game_tools(
    gateway: &Arc<RetrievalGateway>,
    evaluator: Arc<dyn RetrievalEvaluator>,
) -> udaplay_core::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(tools::RetrieveGameTool::new(gateway.clone()))?;
    registry.register(tools::EvaluateRetrievalTool::new(evaluator))?;
    if gateway.web_enabled() {
        registry.register(tools::SearchWebTool::new(gateway.clone()))?;
    }
    Ok(registry)
}

/// System prompt for the game research agent
pub const GAME_AGENT_PROMPT: &str = r"You are UdaPlay, a research assistant for video games. You answer questions about game titles, platforms, release years, genres and publishers.

## How to Research

1. Always start with `retrieve_game` to search the local game catalog
2. Use `evaluate_retrieval` to check whether the retrieved documents answer the question
3. If the catalog has nothing useful, use `search_web` (when available)
4. Answer only from evidence returned by tools in this turn

## Answering

- Cite the source id of every document your answer relies on
- State the release year, platform or publisher exactly as the evidence gives it
- If no tool found supporting evidence, say you could not find the information; never guess

## Tools Available

- `retrieve_game` - Search the local game catalog
- `evaluate_retrieval` - Judge whether retrieved documents are sufficient
- `search_web` - Search the web for games outside the catalog";
