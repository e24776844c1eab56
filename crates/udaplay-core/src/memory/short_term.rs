//! Short-term memory: per-session bounded buffers

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::RwLock;

use super::{MemoryDraft, MemoryRecord, RecordId};
use crate::session::SessionId;

/// Per-session ordered buffer holding at most `capacity` records
pub struct ShortTermMemory {
    capacity: usize,
    buffers: RwLock<HashMap<SessionId, VecDeque<MemoryRecord>>>,
}

impl ShortTermMemory {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest once the buffer is full
    pub async fn push(&self, session_id: &SessionId, draft: MemoryDraft) -> RecordId {
        let record = draft.into_record(session_id, Vec::new());
        let id = record.id.clone();

        let mut buffers = self.buffers.write().await;
        let buffer = buffers.entry(session_id.clone()).or_default();
        while buffer.len() >= self.capacity {
            if let Some(evicted) = buffer.pop_front() {
                tracing::debug!(session = %session_id, record = %evicted.id, "evicted short-term record");
            }
        }
        buffer.push_back(record);
        id
    }

    /// Unexpired records, oldest first
    pub async fn recall(&self, session_id: &SessionId) -> Vec<MemoryRecord> {
        let now = Utc::now();
        let buffers = self.buffers.read().await;
        buffers
            .get(session_id)
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|r| !r.is_expired_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn len(&self, session_id: &SessionId) -> usize {
        self.buffers.read().await.get(session_id).map_or(0, VecDeque::len)
    }

    /// Drop a session's buffer, returning how many records were discarded
    pub async fn flush(&self, session_id: &SessionId) -> usize {
        self.buffers
            .write()
            .await
            .remove(session_id)
            .map_or(0, |buffer| buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_with_oldest_first_eviction() {
        let memory = ShortTermMemory::new(3);
        let session = SessionId::from_string("s1");
        for i in 0..5 {
            memory.push(&session, MemoryDraft::short_term(format!("turn {i}"))).await;
            assert!(memory.len(&session).await <= 3);
        }

        let contents: Vec<_> = memory.recall(&session).await.into_iter().map(|r| r.content).collect();
        assert_eq!(contents, vec!["turn 2", "turn 3", "turn 4"]);
    }

    #[tokio::test]
    async fn test_sessions_are_partitioned() {
        let memory = ShortTermMemory::new(2);
        let a = SessionId::from_string("a");
        let b = SessionId::from_string("b");
        memory.push(&a, MemoryDraft::short_term("from a")).await;
        memory.push(&b, MemoryDraft::short_term("from b")).await;

        assert_eq!(memory.recall(&a).await[0].content, "from a");
        assert_eq!(memory.flush(&a).await, 1);
        assert_eq!(memory.len(&b).await, 1);
    }

    #[tokio::test]
    async fn test_expired_records_are_skipped() {
        let memory = ShortTermMemory::new(4);
        let session = SessionId::from_string("s1");
        memory.push(&session, MemoryDraft::short_term("gone").with_ttl_secs(0)).await;
        memory.push(&session, MemoryDraft::short_term("kept")).await;

        let recalled = memory.recall(&session).await;
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].content, "kept");
    }
}
