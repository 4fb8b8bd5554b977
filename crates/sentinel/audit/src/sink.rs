//! Audit sinks for storing audit entries

use crate::entry::{AuditEntry, PartialAuditEntry};
use crate::error::Result;
use crate::integrity::IntegrityChain;
use async_trait::async_trait;
use parking_lot::RwLock;
use sentinel_types::{EventId, SessionId};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Append-only destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Link the entry into the chain and store it
    async fn write(&self, entry: PartialAuditEntry) -> Result<AuditEntry>;

    async fn flush(&self) -> Result<()>;

    async fn entry_count(&self) -> Result<u64>;
}

// ── Memory Sink ──────────────────────────────────────────────────────

/// In-memory audit sink
pub struct MemoryAuditSink {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    entries: Vec<AuditEntry>,
    chain: IntegrityChain,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.state.read().entries.clone()
    }

    /// Entries recording transitions of one session, in write order
    pub fn entries_for_session(&self, session_id: &SessionId) -> Vec<AuditEntry> {
        self.state
            .read()
            .entries
            .iter()
            .filter(|e| e.record.session_id() == Some(session_id))
            .cloned()
            .collect()
    }

    /// Entries recording notification attempts for one event
    pub fn entries_for_event(&self, event_id: &EventId) -> Vec<AuditEntry> {
        self.state
            .read()
            .entries
            .iter()
            .filter(|e| e.record.event_id() == Some(event_id))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        *self.state.write() = MemoryState::default();
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, partial: PartialAuditEntry) -> Result<AuditEntry> {
        let mut state = self.state.write();
        let entry = partial.finalize(state.chain.previous_hash());
        state.chain.update(&entry);
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.state.read().chain.entry_count())
    }
}

// ── File Sink ────────────────────────────────────────────────────────

/// JSON-lines file sink; one entry per line, appended in chain order
pub struct FileAuditSink {
    path: PathBuf,
    // Held across the append so file order matches chain order
    chain: Mutex<IntegrityChain>,
}

impl FileAuditSink {
    /// Open (or create) the log, resuming the chain from existing entries
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let chain = if tokio::fs::try_exists(&path).await? {
            let entries = read_entries(&path).await?;
            let last_hash = entries.last().map(|e| e.entry_hash.clone());
            IntegrityChain::from_state(last_hash, entries.len() as u64)
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            IntegrityChain::new()
        };

        tracing::debug!(path = %path.display(), entries = chain.entry_count(), "Opened audit log");

        Ok(Self {
            path,
            chain: Mutex::new(chain),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        read_entries(&self.path).await
    }
}

async fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut entries = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }

    Ok(entries)
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn write(&self, partial: PartialAuditEntry) -> Result<AuditEntry> {
        let mut chain = self.chain.lock().await;
        let entry = partial.finalize(chain.previous_hash());
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        // Only advance the head once the entry is on disk
        chain.update(&entry);
        Ok(entry)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.chain.lock().await.entry_count())
    }
}
