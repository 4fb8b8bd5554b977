//! Orchestrator configuration

use sentinel_types::{RetryPolicy, SentinelError, SentinelResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for step invocation and session commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Retry policy for `Retryable` adapters
    pub retry: RetryPolicy,

    /// Compare-and-update attempts before giving up with a concurrency error
    pub max_cas_retries: u32,

    /// Upper bound on a single adapter call; a timeout is a transport fault
    pub step_timeout_ms: u64,

    /// Capacity of the transition broadcast channel
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_cas_retries: 8,
            step_timeout_ms: 30_000,
            event_buffer: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn validate(&self) -> SentinelResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(SentinelError::Config(
                "orchestrator.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.max_cas_retries == 0 {
            return Err(SentinelError::Config(
                "orchestrator.max_cas_retries must be at least 1".into(),
            ));
        }
        if self.step_timeout_ms == 0 {
            return Err(SentinelError::Config(
                "orchestrator.step_timeout_ms must be positive".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(SentinelError::Config(
                "orchestrator.event_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}
