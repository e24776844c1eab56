//! Application State

use std::sync::Arc;

use udaplay_core::{LlmProvider, SessionController};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Owns sessions, memory and the reasoning engine
    pub controller: Arc<SessionController>,

    /// LLM provider, kept for health checks
    pub provider: Arc<dyn LlmProvider>,

    /// Whether a web-search backend is configured
    pub web_search_enabled: bool,

    /// Games ingested at startup
    pub games_indexed: usize,
}
