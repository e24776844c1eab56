//! Persistence boundary for long-term memory

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MemoryRecord, RecordId};
use crate::error::Result;

/// Durable storage for long-term records.
///
/// The store is append-only from the engine's point of view: records are
/// written once and removed only by an explicit `delete`.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Every live record, in write order
    async fn load_all(&self) -> Result<Vec<MemoryRecord>>;

    /// Persist a new record
    async fn append(&self, record: &MemoryRecord) -> Result<()>;

    /// Remove a record; returns whether it existed
    async fn delete(&self, id: &RecordId) -> Result<bool>;
}

/// Process-local backend (nothing survives a restart)
#[derive(Default)]
pub struct InMemoryBackend {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn load_all(&self) -> Result<Vec<MemoryRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn append(&self, record: &MemoryRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| &r.id != id);
        Ok(records.len() != before)
    }
}
