//! Tamper-evident audit trail for MediSentinel
//!
//! Every persisted session transition and every notification attempt is
//! written as a hash-chained [`AuditEntry`] to an [`AuditSink`].

#![deny(unsafe_code)]

pub mod entry;
pub mod error;
pub mod integrity;
pub mod sink;

pub use entry::{AuditEntry, AuditRecord, PartialAuditEntry};
pub use error::{AuditError, Result};
pub use integrity::{ChainVerification, IntegrityChain, IntegrityVerifier};
pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink};

use std::sync::Arc;

/// Shared handle used by the cores to record entries.
///
/// A failed write is logged and swallowed: the state change it describes
/// has already been committed.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Trail backed by a fresh in-memory sink
    pub fn in_memory() -> (Self, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        (Self::new(sink.clone()), sink)
    }

    pub async fn record(&self, entry: PartialAuditEntry) {
        if let Err(e) = self.sink.write(entry).await {
            tracing::warn!(error = %e, "Failed to write audit entry");
        }
    }

    pub async fn flush(&self) {
        if let Err(e) = self.sink.flush().await {
            tracing::warn!(error = %e, "Failed to flush audit sink");
        }
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}
