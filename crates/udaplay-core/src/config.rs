//! Configuration
//!
//! Every group has sane defaults and can be overridden from `UDAPLAY_*`
//! environment variables. A variable that is set but does not parse is a
//! configuration error, never a silent fallback.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::DEFAULT_MAX_CONTEXT_TOKENS;
use crate::embedding::DEFAULT_EMBEDDING_TIMEOUT;
use crate::error::{AgentError, Result};
use crate::memory::DEFAULT_NAMESPACE;
use crate::provider::GenerationOptions;

/// Prompt used when the caller does not supply one
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a research assistant. Use the available tools to \
find evidence before answering, and cite the source ids of the evidence you rely on.";

/// Parse `key` through `lookup`; `None` when unset or blank
fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AgentError::Config(format!("{key}={raw}: {e}"))),
        _ => Ok(None),
    }
}

/// Embedding deadline shared by the memory and retrieval groups
const EMBED_TIMEOUT_VAR: &str = "UDAPLAY_EMBED_TIMEOUT_SECS";

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Reasoning loop limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum ToolCalls per turn, retries included
    pub max_tool_calls: usize,

    /// Retry a failed idempotent tool once
    pub retry_failed_tools: bool,

    pub tool_timeout: Option<Duration>,

    pub model_timeout: Option<Duration>,

    pub max_context_tokens: u32,

    pub generation: GenerationOptions,

    pub system_prompt: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 8,
            retry_failed_tools: true,
            tool_timeout: Some(Duration::from_secs(30)),
            model_timeout: Some(Duration::from_secs(120)),
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            generation: GenerationOptions::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = parse_var(&lookup, "UDAPLAY_MAX_TOOL_CALLS")? {
            config.max_tool_calls = n;
        }
        if let Some(retry) = parse_var(&lookup, "UDAPLAY_RETRY_FAILED_TOOLS")? {
            config.retry_failed_tools = retry;
        }
        // zero disables the deadline
        if let Some(secs) = parse_var::<u64, _>(&lookup, "UDAPLAY_TOOL_TIMEOUT_SECS")? {
            config.tool_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "UDAPLAY_MODEL_TIMEOUT_SECS")? {
            config.model_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(tokens) = parse_var(&lookup, "UDAPLAY_MAX_CONTEXT_TOKENS")? {
            config.max_context_tokens = tokens;
        }
        if let Some(model) = lookup("UDAPLAY_MODEL").filter(|m| !m.trim().is_empty()) {
            config.generation.model = model;
        }
        if let Some(temperature) = parse_var(&lookup, "UDAPLAY_TEMPERATURE")? {
            config.generation.temperature = temperature;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tool_calls == 0 {
            return Err(AgentError::Config("max_tool_calls must be at least 1".into()));
        }
        if self.max_context_tokens == 0 {
            return Err(AgentError::Config("max_context_tokens must be positive".into()));
        }
        Ok(())
    }
}

/// Memory tier sizing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Short-term buffer bound (K), in records
    pub short_term_capacity: usize,

    /// Long-term records pulled into a turn's context
    pub long_term_recall_k: usize,

    /// Recalled records below this similarity stay out of the context
    pub long_term_min_similarity: f32,

    /// Namespace promoted answers are written to
    pub namespace: String,

    /// Deadline for recall and promotion embeddings
    pub embedding_timeout: Option<Duration>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 20,
            long_term_recall_k: 3,
            long_term_min_similarity: 0.35,
            namespace: DEFAULT_NAMESPACE.into(),
            embedding_timeout: Some(DEFAULT_EMBEDDING_TIMEOUT),
        }
    }
}

impl MemoryConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(k) = parse_var(&lookup, "UDAPLAY_SHORT_TERM_CAPACITY")? {
            config.short_term_capacity = k;
        }
        if let Some(k) = parse_var(&lookup, "UDAPLAY_LONG_TERM_RECALL_K")? {
            config.long_term_recall_k = k;
        }
        if let Some(min) = parse_var(&lookup, "UDAPLAY_LONG_TERM_MIN_SIMILARITY")? {
            config.long_term_min_similarity = min;
        }
        if let Some(namespace) = lookup("UDAPLAY_MEMORY_NAMESPACE").filter(|n| !n.trim().is_empty()) {
            config.namespace = namespace;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, EMBED_TIMEOUT_VAR)? {
            config.embedding_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.short_term_capacity == 0 {
            return Err(AgentError::Config("short_term_capacity must be at least 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.long_term_min_similarity) {
            return Err(AgentError::Config("long_term_min_similarity must be within [-1, 1]".into()));
        }
        Ok(())
    }
}

/// Retrieval gateway tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Local matches requested from the index
    pub local_top_n: usize,

    /// Local matches below this similarity are dropped
    pub min_score: f32,

    pub web_top_n: usize,

    /// Score of the top-ranked web result
    pub web_score_ceiling: f32,

    /// Snippet length budget, in characters
    pub snippet_chars: usize,

    /// Deadline for embedding a local query
    pub embedding_timeout: Option<Duration>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            local_top_n: 5,
            min_score: 0.3,
            web_top_n: 3,
            web_score_ceiling: 0.8,
            snippet_chars: 600,
            embedding_timeout: Some(DEFAULT_EMBEDDING_TIMEOUT),
        }
    }
}

impl RetrievalConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = parse_var(&lookup, "UDAPLAY_LOCAL_TOP_N")? {
            config.local_top_n = n;
        }
        if let Some(min) = parse_var(&lookup, "UDAPLAY_MIN_SCORE")? {
            config.min_score = min;
        }
        if let Some(n) = parse_var(&lookup, "UDAPLAY_WEB_TOP_N")? {
            config.web_top_n = n;
        }
        if let Some(ceiling) = parse_var(&lookup, "UDAPLAY_WEB_SCORE_CEILING")? {
            config.web_score_ceiling = ceiling;
        }
        if let Some(chars) = parse_var(&lookup, "UDAPLAY_SNIPPET_CHARS")? {
            config.snippet_chars = chars;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, EMBED_TIMEOUT_VAR)? {
            config.embedding_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_top_n == 0 || self.web_top_n == 0 {
            return Err(AgentError::Config("top-n limits must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(AgentError::Config("min_score must be within [0, 1]".into()));
        }
        if !(self.web_score_ceiling > 0.0 && self.web_score_ceiling <= 1.0) {
            return Err(AgentError::Config("web_score_ceiling must be within (0, 1]".into()));
        }
        if self.snippet_chars == 0 {
            return Err(AgentError::Config("snippet_chars must be positive".into()));
        }
        Ok(())
    }
}

/// Session lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are closed by the reaper
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(secs) = parse_var::<u64, _>(&lookup, "UDAPLAY_SESSION_IDLE_SECS")? {
            if secs == 0 {
                return Err(AgentError::Config("UDAPLAY_SESSION_IDLE_SECS must be positive".into()));
            }
            config.idle_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Complete agent configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub engine: EngineConfig,
    pub memory: MemoryConfig,
    pub retrieval: RetrievalConfig,
    pub session: SessionConfig,
}

impl AgentConfig {
    /// Load every group from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            engine: EngineConfig::from_lookup(&lookup)?,
            memory: MemoryConfig::from_lookup(&lookup)?,
            retrieval: RetrievalConfig::from_lookup(&lookup)?,
            session: SessionConfig::from_lookup(&lookup)?,
        })
    }
}
