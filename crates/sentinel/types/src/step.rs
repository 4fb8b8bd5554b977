//! Step results and failure classification

use crate::{SentinelError, StepName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How an adapter wants its failures treated by the orchestrator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Re-invoke with backoff up to the configured attempt count
    #[default]
    Retryable,
    /// Any failure ends the session in `step_failed`
    Fatal,
}

/// Category of a step error reported by an adapter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Collaborator unreachable or the call timed out
    Transport,
    /// Collaborator answered but refused the request
    Rejected,
    /// Case data was missing or malformed for this step
    InvalidInput,
    /// Anything else
    Internal,
}

/// Error attached to an unsuccessful step result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of one step invocation, recorded once per step per session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: StepName,
    pub succeeded: bool,
    /// Opaque structured output; later steps may read it
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration: Duration,
}

impl StepResult {
    pub fn success(step_name: StepName, payload: serde_json::Value) -> Self {
        Self {
            step_name,
            succeeded: true,
            payload,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn failure(step_name: StepName, error: StepError) -> Self {
        Self {
            step_name,
            succeeded: false,
            payload: serde_json::Value::Null,
            error: Some(error),
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Human-readable failure reason, empty for successes
    pub fn reason(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default()
    }
}

/// Why a session stopped in `step_failed`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    Fatal,
    RetryExhausted { attempts: u32 },
}

/// The failure that moved a session into `step_failed`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: StepName,
    pub kind: FailureKind,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl StepFailure {
    pub fn fatal(step: StepName, reason: impl Into<String>) -> Self {
        Self {
            step,
            kind: FailureKind::Fatal,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn exhausted(step: StepName, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            step,
            kind: FailureKind::RetryExhausted { attempts },
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn to_error(&self) -> SentinelError {
        match self.kind {
            FailureKind::Fatal => SentinelError::StepFatalFailure {
                step: self.step.clone(),
                reason: self.reason.clone(),
            },
            FailureKind::RetryExhausted { attempts } => SentinelError::StepRetryExhausted {
                step: self.step.clone(),
                attempts,
                reason: self.reason.clone(),
            },
        }
    }
}
