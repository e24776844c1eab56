//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Model response did not match the decision format
    #[error("Malformed model output: {0}")]
    MalformedModelOutput(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool with this name is already registered
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    /// Arguments did not match the tool's input schema
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Tool backend failed
    #[error("Tool error: {0}")]
    ToolError(String),

    /// Tool did not answer within the caller's deadline
    #[error("Tool '{tool}' timed out after {millis}ms")]
    ToolTimeout { tool: String, millis: u64 },

    /// Every requested retrieval source failed or returned nothing
    #[error("No evidence available: {0}")]
    NoEvidenceAvailable(String),

    /// Local knowledge index was queried before ingestion
    #[error("Knowledge index not populated")]
    IndexNotPopulated,

    /// Web search backend failed
    #[error("Web search error: {0}")]
    WebSearch(String),

    /// Embedding capability failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index capability failed
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Memory persistence failed
    #[error("Memory storage error: {0}")]
    Storage(String),

    /// Suspension point (model call, embedding) exceeded its deadline
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    /// Turn was cancelled by the caller
    #[error("Cancelled")]
    Cancelled,

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_)
                | Self::RateLimited(_)
                | Self::Timeout { .. }
                | Self::Io(_)
        )
    }

    /// Whether this error only makes sense at startup (registration, config)
    pub const fn is_startup_fatal(&self) -> bool {
        matches!(self, Self::DuplicateTool(_) | Self::Config(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            Self::MalformedModelOutput(_) => "The AI service returned a response that could not be understood.".into(),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::InvalidArguments { reason, .. } => format!("Invalid tool input: {reason}"),
            Self::ToolError(msg) => format!("Tool error: {msg}"),
            Self::ToolTimeout { tool, .. } => format!("The tool '{tool}' took too long to respond."),
            Self::NoEvidenceAvailable(_) => "No information could be found for this question.".into(),
            Self::IndexNotPopulated => "The game knowledge base has not been loaded yet.".into(),
            Self::Cancelled => "The request was cancelled.".into(),
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Session(msg) => format!("Session error: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::ProviderUnavailable("down".into()).is_retryable());
        assert!(AgentError::Timeout { operation: "embed".into(), millis: 10 }.is_retryable());
        assert!(!AgentError::MalformedModelOutput("x".into()).is_retryable());
        assert!(!AgentError::DuplicateTool("retrieve_game".into()).is_retryable());
    }

    #[test]
    fn test_startup_fatal() {
        assert!(AgentError::DuplicateTool("a".into()).is_startup_fatal());
        assert!(AgentError::Config("bad".into()).is_startup_fatal());
        assert!(!AgentError::ToolError("boom".into()).is_startup_fatal());
    }
}
