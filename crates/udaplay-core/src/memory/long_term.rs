//! Long-term memory: durable, similarity-searchable records

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{MemoryBackend, MemoryDraft, MemoryRecord, RecalledMemory, RecordId};
use crate::embedding::{cosine_similarity, embed_within, Embedder, DEFAULT_EMBEDDING_TIMEOUT};
use crate::error::Result;
use crate::session::SessionId;

/// Similarity search over long-term memory
#[derive(Clone, Debug, Default)]
pub struct LongTermQuery {
    pub embedding: Vec<f32>,
    pub limit: usize,
    pub owner: Option<String>,
    pub namespace: Option<String>,
    /// Only records created strictly after this instant
    pub created_after: Option<DateTime<Utc>>,
    /// Only records created strictly before this instant
    pub created_before: Option<DateTime<Utc>>,
}

impl LongTermQuery {
    pub fn new(embedding: Vec<f32>, limit: usize) -> Self {
        Self {
            embedding,
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub const fn created_after(mut self, instant: DateTime<Utc>) -> Self {
        self.created_after = Some(instant);
        self
    }

    #[must_use]
    pub const fn created_before(mut self, instant: DateTime<Utc>) -> Self {
        self.created_before = Some(instant);
        self
    }

    fn matches(&self, record: &MemoryRecord) -> bool {
        let meta = &record.metadata;
        if self.owner.as_ref().is_some_and(|o| meta.owner.as_ref() != Some(o)) {
            return false;
        }
        if self.namespace.as_ref().is_some_and(|ns| &meta.namespace != ns) {
            return false;
        }
        if self.created_after.is_some_and(|after| meta.timestamp <= after) {
            return false;
        }
        if self.created_before.is_some_and(|before| meta.timestamp >= before) {
            return false;
        }
        true
    }
}

#[derive(Default)]
struct Index {
    records: Vec<MemoryRecord>,
    by_hash: HashMap<String, RecordId>,
}

impl Index {
    fn insert(&mut self, record: MemoryRecord) {
        self.by_hash.insert(record.content_hash.clone(), record.id.clone());
        self.records.push(record);
    }
}

/// Shared long-term store: concurrent reads, serialized writes
pub struct LongTermMemory {
    backend: Arc<dyn MemoryBackend>,
    embedder: Arc<dyn Embedder>,
    embedding_timeout: Option<Duration>,
    index: RwLock<Index>,
}

impl LongTermMemory {
    /// Wrap a backend known to be empty.
    ///
    /// Use [`LongTermMemory::open`] for a backend that may hold records.
    pub fn new(backend: Arc<dyn MemoryBackend>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            backend,
            embedder,
            embedding_timeout: Some(DEFAULT_EMBEDDING_TIMEOUT),
            index: RwLock::new(Index::default()),
        }
    }

    /// Load every persisted record from `backend`
    pub async fn open(backend: Arc<dyn MemoryBackend>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let mut index = Index::default();
        for record in backend.load_all().await? {
            index.insert(record);
        }
        tracing::info!(records = index.records.len(), "long-term memory loaded");
        Ok(Self {
            backend,
            embedder,
            embedding_timeout: Some(DEFAULT_EMBEDDING_TIMEOUT),
            index: RwLock::new(index),
        })
    }

    /// Deadline for the embedding each write computes; `None` waits forever
    #[must_use]
    pub fn with_embedding_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.embedding_timeout = timeout;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed `text` under this store's deadline
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        embed_within(self.embedder.as_ref(), text, self.embedding_timeout).await
    }

    /// Embed and persist a draft; identical drafts resolve to the stored record
    pub async fn remember(&self, session_id: &SessionId, draft: MemoryDraft) -> Result<RecordId> {
        let hash = draft.content_hash(session_id);
        if let Some(id) = self.index.read().await.by_hash.get(&hash) {
            tracing::debug!(record = %id, "duplicate long-term record suppressed");
            return Ok(id.clone());
        }

        let embedding = self.embed(&draft.content).await?;
        let record = draft.into_record(session_id, embedding);

        let mut index = self.index.write().await;
        // another writer may have stored the same content while we embedded
        if let Some(id) = index.by_hash.get(&hash) {
            return Ok(id.clone());
        }
        self.backend.append(&record).await?;
        let id = record.id.clone();
        tracing::debug!(record = %id, session = %session_id, "long-term record stored");
        index.insert(record);
        Ok(id)
    }

    /// Matching records by descending similarity, most recent first on ties.
    ///
    /// An empty store yields an empty result.
    pub async fn recall(&self, query: &LongTermQuery) -> Vec<RecalledMemory> {
        if query.limit == 0 {
            return Vec::new();
        }
        let now = Utc::now();
        let index = self.index.read().await;
        let mut scored: Vec<RecalledMemory> = index
            .records
            .iter()
            .filter(|r| !r.is_expired_at(now) && query.matches(r))
            .map(|r| RecalledMemory {
                similarity: cosine_similarity(&query.embedding, &r.embedding),
                record: r.clone(),
            })
            .collect();
        drop(index);

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.record.metadata.timestamp.cmp(&a.record.metadata.timestamp))
        });
        scored.truncate(query.limit);
        scored
    }

    /// Delete a record; the only way long-term records leave the store
    pub async fn forget(&self, id: &RecordId) -> Result<bool> {
        let mut index = self.index.write().await;
        let existed = self.backend.delete(id).await?;
        index.records.retain(|r| &r.id != id);
        index.by_hash.retain(|_, v| v != id);
        Ok(existed)
    }

    /// Distinct namespaces currently stored
    pub async fn namespaces(&self) -> Vec<String> {
        let index = self.index.read().await;
        index
            .records
            .iter()
            .map(|r| r.metadata.namespace.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::error::AgentError;
    use crate::memory::{InMemoryBackend, RecordKind};

    fn memory() -> LongTermMemory {
        LongTermMemory::new(Arc::new(InMemoryBackend::new()), Arc::new(MockEmbedder::default()))
    }

    #[tokio::test]
    async fn test_ties_prefer_most_recent() {
        let memory = memory();
        let older = memory
            .remember(&SessionId::from_string("a"), MemoryDraft::long_term("Chrono Trigger", RecordKind::Fact))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = memory
            .remember(&SessionId::from_string("b"), MemoryDraft::long_term("Chrono Trigger", RecordKind::Fact))
            .await
            .unwrap();
        assert_ne!(older, newer);

        let query = memory.embedder().embed("Chrono Trigger").await.unwrap();
        let recalled = memory.recall(&LongTermQuery::new(query, 2)).await;
        assert_eq!(recalled[0].record.id, newer);
        assert_eq!(recalled[1].record.id, older);
    }

    #[tokio::test]
    async fn test_owner_and_namespace_filters() {
        let memory = memory();
        let session = SessionId::from_string("s");
        memory
            .remember(&session, MemoryDraft::long_term("likes Zelda", RecordKind::Fact).with_owner("ana"))
            .await
            .unwrap();
        memory
            .remember(
                &session,
                MemoryDraft::long_term("likes Zelda", RecordKind::Fact)
                    .with_owner("bo")
                    .with_namespace("prefs"),
            )
            .await
            .unwrap();

        let query = memory.embedder().embed("likes Zelda").await.unwrap();
        let ana = memory.recall(&LongTermQuery::new(query.clone(), 5).owner("ana")).await;
        assert_eq!(ana.len(), 1);
        assert_eq!(ana[0].record.metadata.owner.as_deref(), Some("ana"));

        let prefs = memory.recall(&LongTermQuery::new(query, 5).namespace("prefs")).await;
        assert_eq!(prefs.len(), 1);
        assert_eq!(memory.namespaces().await, vec!["default".to_string(), "prefs".to_string()]);
    }

    #[tokio::test]
    async fn test_time_window_filter() {
        let memory = memory();
        let session = SessionId::from_string("s");
        memory
            .remember(&session, MemoryDraft::long_term("old fact", RecordKind::Fact))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let cutoff = Utc::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        memory
            .remember(&session, MemoryDraft::long_term("new fact", RecordKind::Fact))
            .await
            .unwrap();

        let query = memory.embedder().embed("fact").await.unwrap();
        let recent = memory.recall(&LongTermQuery::new(query.clone(), 5).created_after(cutoff)).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].record.content, "new fact");

        let earlier = memory.recall(&LongTermQuery::new(query, 5).created_before(cutoff)).await;
        assert_eq!(earlier.len(), 1);
        assert_eq!(earlier[0].record.content, "old fact");
    }

    #[tokio::test]
    async fn test_forget_is_the_only_removal() {
        let memory = memory();
        let session = SessionId::from_string("s");
        let id = memory
            .remember(&session, MemoryDraft::long_term("Metroid", RecordKind::Fact))
            .await
            .unwrap();
        assert_eq!(memory.len().await, 1);
        assert!(memory.forget(&id).await.unwrap());
        assert!(memory.is_empty().await);
        assert!(!memory.forget(&id).await.unwrap());

        // content can be stored again after deletion
        let again = memory
            .remember(&session, MemoryDraft::long_term("Metroid", RecordKind::Fact))
            .await
            .unwrap();
        assert_ne!(again, id);
    }

    #[tokio::test]
    async fn test_stalled_embedder_times_out() {
        let memory = LongTermMemory::new(Arc::new(InMemoryBackend::new()), Arc::new(crate::mock::StalledEmbedder))
            .with_embedding_timeout(Some(Duration::from_millis(20)));
        let err = memory
            .remember(&SessionId::new(), MemoryDraft::long_term("Banjo-Kazooie", RecordKind::Fact))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Timeout { ref operation, .. } if operation == "embedding"));
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_open_replays_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::default());
        let first = LongTermMemory::new(backend.clone(), embedder.clone());
        first
            .remember(&SessionId::from_string("s"), MemoryDraft::long_term("Tetris 1984", RecordKind::Fact))
            .await
            .unwrap();

        let reopened = LongTermMemory::open(backend, embedder).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        let dup = reopened
            .remember(&SessionId::from_string("s"), MemoryDraft::long_term("Tetris 1984", RecordKind::Fact))
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(dup, reopened.recall(&LongTermQuery::new(vec![0.0; 512], 1)).await[0].record.id);
    }
}
