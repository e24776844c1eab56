//! Test doubles for the external capabilities
//!
//! Used by the unit tests in this crate and by downstream scenario tests;
//! also handy for running the engine without a model server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::context::Message;
use crate::embedding::Embedder;
use crate::error::{AgentError, Result};
use crate::provider::{Completion, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo};
use crate::retrieval::{Evidence, SearchSnippet, WebSearch};
use crate::tool::{OutputSchema, ParamType, ParameterSchema, Tool, ToolArguments, ToolOutput, ToolSpec};

type Script = dyn Fn(usize, &[Message]) -> Result<String> + Send + Sync;

/// Model that answers from a script instead of a network call.
///
/// The script receives the 0-based call index and the messages sent.
pub struct ScriptedProvider {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn from_fn(script: impl Fn(usize, &[Message]) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Replies in order; the last one repeats once the list runs out
    pub fn from_replies<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        let replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        Self::from_fn(move |index, _| {
            replies
                .get(index)
                .or_else(|| replies.last())
                .cloned()
                .ok_or_else(|| AgentError::Provider("script is empty".into()))
        })
    }

    /// The same reply on every call
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self::from_replies([reply.into()])
    }

    /// Sleep before every reply
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of completions requested so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message lists received, one per call
    pub async fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "scripted".into(),
            models: Vec::new(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, messages: &[Message], options: &GenerationOptions) -> Result<Completion> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push(messages.to_vec());
        let reply = (self.script)(index, messages)?;
        Ok(Completion::text(reply, options.model.clone()))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(Vec::new())
    }
}

/// Web search returning fixed snippets
pub struct StaticWebSearch {
    snippets: Vec<SearchSnippet>,
}

impl StaticWebSearch {
    pub const fn new(snippets: Vec<SearchSnippet>) -> Self {
        Self { snippets }
    }
}

#[async_trait]
impl WebSearch for StaticWebSearch {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchSnippet>> {
        Ok(self.snippets.iter().take(max_results).cloned().collect())
    }
}

/// Embedding backend that never answers
pub struct StalledEmbedder;

#[async_trait]
impl Embedder for StalledEmbedder {
    fn dimension(&self) -> usize {
        crate::embedding::MOCK_EMBEDDING_DIM
    }

    fn model_name(&self) -> &str {
        "stalled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        std::future::pending().await
    }
}

/// Web search whose backend is always unreachable
pub struct FailingWebSearch;

#[async_trait]
impl WebSearch for FailingWebSearch {
    fn name(&self) -> &str {
        "failing"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchSnippet>> {
        Err(AgentError::WebSearch("backend unreachable".into()))
    }
}

/// Idempotent retrieval tool returning fixed evidence.
///
/// With no evidence it fails with `NoEvidenceAvailable`.
pub struct EvidenceTool {
    name: String,
    evidence: Vec<Evidence>,
    calls: Arc<AtomicUsize>,
}

impl EvidenceTool {
    pub fn new(name: impl Into<String>, evidence: Vec<Evidence>) -> Self {
        Self {
            name: name.into(),
            evidence,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared invocation counter; grab it before registering
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for EvidenceTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: "Returns fixed evidence for any query".into(),
            parameters: vec![ParameterSchema::required("query", ParamType::String, "Search text")],
            output: OutputSchema::Evidence,
            idempotent: true,
        }
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        if self.evidence.is_empty() {
            return Err(AgentError::NoEvidenceAvailable(format!("no results for '{query}'")));
        }
        Ok(ToolOutput::with_evidence(
            format!("{} results for '{query}'", self.evidence.len()),
            self.evidence.clone(),
        ))
    }
}

/// Tool that takes `delay` to answer
pub struct SlowTool {
    delay: Duration,
}

impl SlowTool {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "slow".into(),
            description: "Sleeps before answering".into(),
            parameters: Vec::new(),
            output: OutputSchema::Text,
            idempotent: true,
        }
    }

    async fn execute(&self, _arguments: &ToolArguments) -> Result<ToolOutput> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolOutput::text("done"))
    }
}
