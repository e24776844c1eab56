//! Memory Store
//!
//! Two tiers behind one facade:
//!
//! - **short-term**: per-session ordered buffer of recent exchanges, bounded
//!   to the last K records with oldest-first eviction, discarded at session end
//! - **long-term**: durable, similarity-searchable records; append-only,
//!   de-duplicated by content hash, removed only through [`MemoryStore::forget`]

mod backend;
mod long_term;
mod short_term;

pub use backend::{InMemoryBackend, MemoryBackend};
pub use long_term::{LongTermMemory, LongTermQuery};
pub use short_term::ShortTermMemory;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::session::SessionId;

/// Namespace used when a draft does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Unique memory record identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a record holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A standalone fact (e.g. a user preference)
    Fact,
    /// A question/answer exchange
    Exchange,
}

/// Which tier a draft is written to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    LongTerm,
}

/// Record metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub session_id: SessionId,

    pub timestamp: DateTime<Utc>,

    pub kind: RecordKind,

    /// Owner for multi-user isolation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.into()
}

/// A stored memory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: RecordId,

    pub content: String,

    /// Empty for short-term records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,

    pub metadata: RecordMetadata,

    /// Time-to-live in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,

    /// SHA-256 over content and identifying metadata
    pub content_hash: String,
}

impl MemoryRecord {
    /// Whether the TTL has elapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl_secs.is_some_and(|ttl| {
            let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
            Duration::try_seconds(ttl)
                .and_then(|d| self.metadata.timestamp.checked_add_signed(d))
                .is_some_and(|expires_at| now >= expires_at)
        })
    }
}

/// A long-term record together with its similarity to the query
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecalledMemory {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// Input to [`MemoryStore::remember`]
#[derive(Clone, Debug)]
pub struct MemoryDraft {
    pub content: String,
    pub kind: RecordKind,
    pub tier: MemoryTier,
    pub owner: Option<String>,
    pub namespace: Option<String>,
    pub ttl_secs: Option<u64>,
    pub extra: BTreeMap<String, String>,
}

impl MemoryDraft {
    pub fn new(content: impl Into<String>, kind: RecordKind, tier: MemoryTier) -> Self {
        Self {
            content: content.into(),
            kind,
            tier,
            owner: None,
            namespace: None,
            ttl_secs: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn short_term(content: impl Into<String>) -> Self {
        Self::new(content, RecordKind::Exchange, MemoryTier::ShortTerm)
    }

    pub fn long_term(content: impl Into<String>, kind: RecordKind) -> Self {
        Self::new(content, kind, MemoryTier::LongTerm)
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub const fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    fn metadata(&self, session_id: &SessionId) -> RecordMetadata {
        RecordMetadata {
            session_id: session_id.clone(),
            timestamp: Utc::now(),
            kind: self.kind,
            owner: self.owner.clone(),
            namespace: self.namespace.clone().unwrap_or_else(default_namespace),
            extra: self.extra.clone(),
        }
    }

    /// Hash of content plus identifying metadata (timestamp excluded)
    pub fn content_hash(&self, session_id: &SessionId) -> String {
        let mut hasher = Sha256::new();
        let kind = match self.kind {
            RecordKind::Fact => "fact",
            RecordKind::Exchange => "exchange",
        };
        for part in [
            self.content.as_str(),
            kind,
            session_id.as_str(),
            self.owner.as_deref().unwrap_or(""),
            self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        for (key, value) in &self.extra {
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    pub(crate) fn into_record(self, session_id: &SessionId, embedding: Vec<f32>) -> MemoryRecord {
        let content_hash = self.content_hash(session_id);
        let metadata = self.metadata(session_id);
        MemoryRecord {
            id: RecordId::new(),
            content: self.content,
            embedding,
            metadata,
            ttl_secs: self.ttl_secs,
            content_hash,
        }
    }
}

/// Facade over both memory tiers
pub struct MemoryStore {
    short_term: ShortTermMemory,
    long_term: LongTermMemory,
}

impl MemoryStore {
    pub const fn new(short_term: ShortTermMemory, long_term: LongTermMemory) -> Self {
        Self { short_term, long_term }
    }

    /// Short-term buffer of `capacity` turns over an in-memory long-term store
    pub fn in_memory(capacity: usize, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(
            ShortTermMemory::new(capacity),
            LongTermMemory::new(Arc::new(InMemoryBackend::new()), embedder),
        )
    }

    /// Write a record to the tier its draft names.
    ///
    /// Long-term writes embed the content and are idempotent: an identical
    /// draft returns the id of the record already stored.
    pub async fn remember(&self, session_id: &SessionId, draft: MemoryDraft) -> Result<RecordId> {
        match draft.tier {
            MemoryTier::ShortTerm => Ok(self.short_term.push(session_id, draft).await),
            MemoryTier::LongTerm => self.long_term.remember(session_id, draft).await,
        }
    }

    /// The session's recent records, oldest first
    pub async fn recall_short_term(&self, session_id: &SessionId) -> Vec<MemoryRecord> {
        self.short_term.recall(session_id).await
    }

    /// Top-`k` long-term records by descending similarity
    pub async fn recall_long_term(&self, query_embedding: &[f32], k: usize) -> Vec<RecalledMemory> {
        self.long_term.recall(&LongTermQuery::new(query_embedding.to_vec(), k)).await
    }

    pub async fn recall_long_term_filtered(&self, query: &LongTermQuery) -> Vec<RecalledMemory> {
        self.long_term.recall(query).await
    }

    /// Embed `text` and recall the top-`k` long-term records for it
    pub async fn recall_relevant(&self, text: &str, k: usize) -> Result<Vec<RecalledMemory>> {
        let embedding = self.long_term.embed(text).await?;
        Ok(self.recall_long_term(&embedding, k).await)
    }

    /// Discard a session's short-term buffer
    pub async fn flush_session(&self, session_id: &SessionId) -> usize {
        self.short_term.flush(session_id).await
    }

    /// Explicitly delete a long-term record
    pub async fn forget(&self, id: &RecordId) -> Result<bool> {
        self.long_term.forget(id).await
    }

    pub const fn short_term(&self) -> &ShortTermMemory {
        &self.short_term
    }

    pub const fn long_term(&self) -> &LongTermMemory {
        &self.long_term
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;

    fn store(capacity: usize) -> MemoryStore {
        MemoryStore::in_memory(capacity, Arc::new(MockEmbedder::default()))
    }

    #[test]
    fn test_hash_ignores_timestamp_but_not_metadata() {
        let session = SessionId::from_string("s1");
        let a = MemoryDraft::long_term("likes RPGs", RecordKind::Fact);
        let b = MemoryDraft::long_term("likes RPGs", RecordKind::Fact);
        assert_eq!(a.content_hash(&session), b.content_hash(&session));

        let owned = MemoryDraft::long_term("likes RPGs", RecordKind::Fact).with_owner("ana");
        assert_ne!(a.content_hash(&session), owned.content_hash(&session));
        assert_ne!(
            a.content_hash(&session),
            a.content_hash(&SessionId::from_string("s2"))
        );
    }

    #[tokio::test]
    async fn test_round_trip_self_similarity() {
        let store = store(4);
        let session = SessionId::from_string("s1");
        let content = "The user prefers Nintendo handheld games";
        let id = store
            .remember(&session, MemoryDraft::long_term(content, RecordKind::Fact))
            .await
            .unwrap();

        let recalled = store.recall_relevant(content, 3).await.unwrap();
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].record.id, id);
        assert!(recalled[0].similarity >= 0.999);
    }

    #[tokio::test]
    async fn test_remember_is_idempotent() {
        let store = store(4);
        let session = SessionId::from_string("s1");
        let first = store
            .remember(&session, MemoryDraft::long_term("Halo launched with the Xbox", RecordKind::Fact))
            .await
            .unwrap();
        let second = store
            .remember(&session, MemoryDraft::long_term("Halo launched with the Xbox", RecordKind::Fact))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.long_term().len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_long_term_recall() {
        let store = store(4);
        let recalled = store.recall_relevant("anything", 5).await.unwrap();
        assert!(recalled.is_empty());
    }

    #[tokio::test]
    async fn test_short_term_routed_by_tier() {
        let store = store(2);
        let session = SessionId::from_string("s1");
        store.remember(&session, MemoryDraft::short_term("Q1 / A1")).await.unwrap();
        assert_eq!(store.recall_short_term(&session).await.len(), 1);
        assert_eq!(store.long_term().len().await, 0);
        assert_eq!(store.flush_session(&session).await, 1);
        assert!(store.recall_short_term(&session).await.is_empty());
    }
}
