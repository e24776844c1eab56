//! Retrieval Gateway
//!
//! One entry point over the local knowledge index and the web-search
//! backend. Every result comes back as [`Evidence`] carrying its source,
//! score and origin so the reasoning engine can bind answers to it.
//!
//! ```text
//!   retrieve(query, {local, web})
//!        │
//!        ├── local ─ embed ─ VectorIndex::query ─ drop < min_score
//!        ├── web ─── WebSearch::search ─ score = ceiling / (rank + 1)
//!        │
//!        └── merge ─ sort by score (local first on ties)
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, embed_within, Embedder};
use crate::error::{AgentError, Result};

/// Where a piece of evidence came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceOrigin {
    /// Local knowledge index (preferred on score ties)
    Local,
    /// Web search
    Web,
}

impl std::fmt::Display for EvidenceOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Web => write!(f, "web"),
        }
    }
}

/// A retrieved snippet with provenance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub snippet: String,

    /// Document id for local evidence, URL for web evidence
    pub source_id: String,

    /// Similarity (local) or rank-derived score (web), in [0, 1]
    pub score: f32,

    pub origin: EvidenceOrigin,

    /// Tool that produced this evidence; set by the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl Evidence {
    pub fn new(snippet: impl Into<String>, source_id: impl Into<String>, score: f32, origin: EvidenceOrigin) -> Self {
        Self {
            snippet: snippet.into(),
            source_id: source_id.into(),
            score,
            origin,
            tool: None,
        }
    }
}

/// Scores closer than this resolution are ties
const SCORE_RESOLUTION: f32 = 1e-5;

#[allow(clippy::cast_possible_truncation)]
fn score_key(score: f32) -> i64 {
    (score / SCORE_RESOLUTION).round() as i64
}

/// Order by descending score; local before web on ties
pub fn rank_evidence(evidence: &mut [Evidence]) {
    evidence.sort_by_key(|e| (std::cmp::Reverse(score_key(e.score)), e.origin));
}

/// Requested retrieval sources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSet {
    pub local: bool,
    pub web: bool,
}

impl SourceSet {
    pub const fn local() -> Self {
        Self { local: true, web: false }
    }

    pub const fn web() -> Self {
        Self { local: false, web: true }
    }

    pub const fn both() -> Self {
        Self { local: true, web: true }
    }

    pub const fn is_empty(self) -> bool {
        !self.local && !self.web
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// A document stored in the vector index
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A ranked index hit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexMatch {
    pub id: String,
    pub similarity: f32,
    pub document: IndexDocument,
}

/// Vector index capability (external backend)
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-`k` documents by similarity, best first
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<IndexMatch>>;

    /// Insert or replace a document
    async fn upsert(&self, id: &str, embedding: Vec<f32>, document: IndexDocument) -> Result<()>;

    /// Number of stored documents
    async fn len(&self) -> Result<usize>;
}

/// A single web result, in provider rank order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchSnippet {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Web-search capability (external backend)
#[async_trait]
pub trait WebSearch: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchSnippet>>;
}

/// Brute-force cosine index kept in process memory
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, (Vec<f32>, IndexDocument)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<IndexMatch>> {
        let entries = self.entries.read().await;
        let mut matches: Vec<IndexMatch> = entries
            .iter()
            .map(|(id, (vector, document))| IndexMatch {
                id: id.clone(),
                similarity: cosine_similarity(embedding, vector),
                document: document.clone(),
            })
            .collect();
        drop(entries);

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn upsert(&self, id: &str, embedding: Vec<f32>, document: IndexDocument) -> Result<()> {
        self.entries.write().await.insert(id.to_string(), (embedding, document));
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Uniform retrieval over local index and web search
pub struct RetrievalGateway {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    web: Option<Arc<dyn WebSearch>>,
    config: RetrievalConfig,
}

impl RetrievalGateway {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, config: RetrievalConfig) -> Self {
        Self {
            embedder,
            index,
            web: None,
            config,
        }
    }

    #[must_use]
    pub fn with_web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    pub const fn web_enabled(&self) -> bool {
        self.web.is_some()
    }

    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve ranked evidence for `query` from the requested sources.
    ///
    /// A failing source is skipped as degraded. Fails with
    /// `NoEvidenceAvailable` when every requested source failed or nothing
    /// cleared the score threshold, and with `IndexNotPopulated` when only
    /// the local source was requested and it has no documents.
    pub async fn retrieve(&self, query: &str, sources: SourceSet) -> Result<Vec<Evidence>> {
        if sources.is_empty() {
            return Err(AgentError::NoEvidenceAvailable("no retrieval source requested".into()));
        }

        let local = async {
            if sources.local {
                Some(self.retrieve_local(query).await)
            } else {
                None
            }
        };
        let web = async {
            if sources.web {
                Some(self.retrieve_web(query).await)
            } else {
                None
            }
        };
        let (local, web) = futures::join!(local, web);

        if !sources.web {
            if let Some(Err(AgentError::IndexNotPopulated)) = local {
                return Err(AgentError::IndexNotPopulated);
            }
        }

        let mut merged = Vec::new();
        let mut failures = Vec::new();
        for (origin, outcome) in [(EvidenceOrigin::Local, local), (EvidenceOrigin::Web, web)] {
            match outcome {
                Some(Ok(evidence)) => merged.extend(evidence),
                Some(Err(e)) => {
                    tracing::warn!(source = %origin, error = %e, "retrieval source degraded");
                    failures.push(format!("{origin}: {e}"));
                }
                None => {}
            }
        }

        let requested = usize::from(sources.local) + usize::from(sources.web);
        if failures.len() == requested {
            return Err(AgentError::NoEvidenceAvailable(failures.join("; ")));
        }

        rank_evidence(&mut merged);
        if merged.is_empty() {
            return Err(AgentError::NoEvidenceAvailable(format!("no results for '{query}'")));
        }

        tracing::debug!(query, results = merged.len(), "retrieval complete");
        Ok(merged)
    }

    async fn retrieve_local(&self, query: &str) -> Result<Vec<Evidence>> {
        if self.index.len().await? == 0 {
            return Err(AgentError::IndexNotPopulated);
        }
        let embedding = embed_within(self.embedder.as_ref(), query, self.config.embedding_timeout).await?;
        let matches = self.index.query(&embedding, self.config.local_top_n).await?;

        Ok(matches
            .into_iter()
            .filter(|m| m.similarity >= self.config.min_score)
            .map(|m| {
                Evidence::new(
                    truncate_chars(&m.document.text, self.config.snippet_chars),
                    m.id,
                    m.similarity,
                    EvidenceOrigin::Local,
                )
            })
            .collect())
    }

    async fn retrieve_web(&self, query: &str) -> Result<Vec<Evidence>> {
        let web = self
            .web
            .as_ref()
            .ok_or_else(|| AgentError::WebSearch("web search disabled".into()))?;
        let snippets = web.search(query, self.config.web_top_n).await?;

        Ok(snippets
            .into_iter()
            .take(self.config.web_top_n)
            .enumerate()
            .map(|(rank, s)| {
                let text = if s.title.is_empty() {
                    normalize_whitespace(&s.content)
                } else {
                    format!("{}: {}", s.title.trim(), normalize_whitespace(&s.content))
                };
                let source = if s.url.is_empty() { s.title } else { s.url };
                Evidence::new(
                    truncate_chars(&text, self.config.snippet_chars),
                    source,
                    web_score(rank, self.config.web_score_ceiling),
                    EvidenceOrigin::Web,
                )
            })
            .collect())
    }
}

/// Synthetic similarity for the web result at 0-based `rank`
#[allow(clippy::cast_precision_loss)]
pub fn web_score(rank: usize, ceiling: f32) -> f32 {
    ceiling / (rank as f32 + 1.0)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
