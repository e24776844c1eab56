//! Service Kit - Agent Tools
//!
//! Domain-specific tools that implement `udaplay_core::Tool` for game research.

mod evaluate_retrieval;
mod retrieve_game;
mod search_web;

pub use evaluate_retrieval::EvaluateRetrievalTool;
pub use retrieve_game::RetrieveGameTool;
pub use search_web::SearchWebTool;
