//! Append-only JSON-lines backend for long-term memory
//!
//! Every write is one line: either a `put` carrying the full record or a
//! `delete` naming a record id. Opening the file replays the log.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom};
use tokio::sync::Mutex;
use tokio_stream::{wrappers::LinesStream, StreamExt};
use udaplay_core::{
    error::{AgentError, Result},
    memory::{MemoryBackend, MemoryRecord, RecordId},
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Put { record: MemoryRecord },
    Delete { id: RecordId },
}

struct LogState {
    file: File,
    live: HashSet<RecordId>,
}

/// Durable long-term memory in a single JSON-lines file
pub struct JsonlMemoryBackend {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl JsonlMemoryBackend {
    /// Open (or create) the log at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        if !ends_with_newline(&path).await? {
            // close a torn final line so the next entry starts on its own
            file.write_all(b"\n").await?;
            file.flush().await?;
            file.sync_data().await?;
            tracing::warn!(path = %path.display(), "memory log ended mid-entry; terminated torn line");
        }
        let live = replay(&path).await?.into_iter().map(|r| r.id).collect();
        tracing::info!(path = %path.display(), "memory log opened");
        Ok(Self {
            path,
            state: Mutex::new(LogState { file, live }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_entry(file: &mut File, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// True for an empty log or one whose last byte is a newline
async fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path).await?;
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

/// Rebuild the live record set from the log, in write order
async fn replay(path: &Path) -> Result<Vec<MemoryRecord>> {
    let file = File::open(path).await?;
    let mut lines = LinesStream::new(BufReader::new(file).lines());
    let mut records: Vec<MemoryRecord> = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next().await {
        line_no += 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(&line) {
            Ok(LogEntry::Put { record }) => records.push(record),
            Ok(LogEntry::Delete { id }) => records.retain(|r| r.id != id),
            // a torn final write must not make the whole log unreadable
            Err(e) => tracing::warn!(path = %path.display(), line = line_no, error = %e, "skipping unreadable log entry"),
        }
    }
    Ok(records)
}

#[async_trait]
impl MemoryBackend for JsonlMemoryBackend {
    async fn load_all(&self) -> Result<Vec<MemoryRecord>> {
        // hold the lock so no write interleaves with the read
        let _state = self.state.lock().await;
        replay(&self.path).await
    }

    async fn append(&self, record: &MemoryRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.live.contains(&record.id) {
            return Err(AgentError::Storage(format!("record {} already stored", record.id)));
        }
        Self::write_entry(&mut state.file, &LogEntry::Put { record: record.clone() }).await?;
        state.live.insert(record.id.clone());
        Ok(())
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.live.contains(id) {
            return Ok(false);
        }
        Self::write_entry(&mut state.file, &LogEntry::Delete { id: id.clone() }).await?;
        state.live.remove(id);
        Ok(true)
    }
}
