//! Error Types for the game knowledge domain

use thiserror::Error;
use udaplay_core::AgentError;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Catalog directory not found: {0}")]
    CatalogNotFound(String),

    #[error("Invalid game file {file}: {reason}")]
    InvalidGame { file: String, reason: String },

    #[error("Catalog is empty")]
    EmptyCatalog,

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl From<KnowledgeError> for AgentError {
    fn from(err: KnowledgeError) -> Self {
        match err {
            KnowledgeError::Agent(inner) => inner,
            KnowledgeError::Io(e) => Self::Io(e),
            KnowledgeError::Serialization(e) => Self::Json(e),
            KnowledgeError::Evaluation(reason) => Self::MalformedModelOutput(reason),
            other => Self::Config(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_passes_through() {
        let err: AgentError = KnowledgeError::Agent(AgentError::IndexNotPopulated).into();
        assert!(matches!(err, AgentError::IndexNotPopulated));
    }

    #[test]
    fn test_catalog_errors_are_startup_config() {
        let err: AgentError = KnowledgeError::EmptyCatalog.into();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
