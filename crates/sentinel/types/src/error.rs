//! Error taxonomy shared by the orchestration and telemetry cores.

use crate::{DeviceId, EventId, SessionId, SessionStatus, StepName, VitalName};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by MediSentinel core operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SentinelError {
    /// Workflow kind is not registered in the catalog.
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// Session does not exist (or was archived).
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Device is not registered.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// Emergency event does not exist.
    #[error("emergency event not found: {0}")]
    EventNotFound(EventId),

    /// Session changed underneath a compare-and-update; callers retry.
    #[error("session {0} was modified concurrently")]
    ConcurrentModification(SessionId),

    /// A different override payload was already applied.
    #[error("session {0} already carries a different emergency override")]
    OverrideConflict(SessionId),

    /// Operation not permitted from the session's current status.
    #[error("cannot {action} session {session_id} in status {status}")]
    InvalidTransition {
        session_id: SessionId,
        status: SessionStatus,
        action: &'static str,
    },

    /// Device id is already registered.
    #[error("device already registered: {0}")]
    DuplicateDevice(DeviceId),

    /// Device would end up with more than one primary contact.
    #[error("device {0} already has a primary contact")]
    PrimaryConflict(DeviceId),

    /// Sample is older than the last accepted one for the device.
    #[error("out-of-order sample for device {device_id}: {timestamp} precedes {latest}")]
    OutOfOrderSample {
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    /// Reading is NaN or infinite.
    #[error("non-finite {vital} reading from device {device_id}: {value}")]
    InvalidReading {
        device_id: DeviceId,
        vital: VitalName,
        value: f64,
    },

    /// Step failed in a way that must not be retried.
    #[error("step {step} failed fatally: {reason}")]
    StepFatalFailure { step: StepName, reason: String },

    /// Step kept failing until its retry budget ran out.
    #[error("step {step} failed after {attempts} attempts: {reason}")]
    StepRetryExhausted {
        step: StepName,
        attempts: u32,
        reason: String,
    },

    /// Every contact and channel failed for an emergency event.
    #[error("all notification attempts failed for event {0}")]
    NotificationExhausted(EventId),

    /// Audit trail could not be written.
    #[error("audit error: {0}")]
    Audit(String),

    /// Invalid configuration or definition.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SentinelError {
    /// Whether the caller should re-read and retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, SentinelError::ConcurrentModification(_))
    }
}

/// Result type for MediSentinel operations.
pub type SentinelResult<T> = Result<T, SentinelError>;
