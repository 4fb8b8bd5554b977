//! Audit error types

use sentinel_types::SentinelError;
use thiserror::Error;

/// Errors raised while writing or reading the audit trail
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;

impl From<AuditError> for SentinelError {
    fn from(err: AuditError) -> Self {
        SentinelError::Audit(err.to_string())
    }
}
