//! Telemetry monitor and notification dispatcher configuration

use sentinel_types::{RetryPolicy, SentinelError, SentinelResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Threshold evaluation and event bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Consecutive in-bounds samples that close an open event
    pub close_after_in_bounds: u32,

    /// Recent samples kept per device
    pub window_len: usize,

    /// Closed events kept per device
    pub event_history: usize,

    /// Capacity of the telemetry event broadcast channel
    pub bus_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            close_after_in_bounds: 1,
            window_len: 10,
            event_history: 50,
            bus_capacity: 256,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> SentinelResult<()> {
        if self.close_after_in_bounds == 0 {
            return Err(SentinelError::Config(
                "monitor.close_after_in_bounds must be at least 1".into(),
            ));
        }
        if self.window_len == 0 {
            return Err(SentinelError::Config(
                "monitor.window_len must be at least 1".into(),
            ));
        }
        if self.bus_capacity == 0 {
            return Err(SentinelError::Config(
                "monitor.bus_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Contact fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-channel retry policy
    pub retry: RetryPolicy,

    /// How long a stage may go without a delivery before the next contact
    /// is tried
    pub contact_wait_ms: u64,

    /// Channel sends in flight at once, across all events
    pub max_parallel: usize,

    /// Events whose attempt logs are kept; the oldest is evicted first
    pub log_retention: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            contact_wait_ms: 30_000,
            max_parallel: 8,
            log_retention: 1024,
        }
    }
}

impl DispatchConfig {
    pub fn contact_wait(&self) -> Duration {
        Duration::from_millis(self.contact_wait_ms)
    }

    pub fn validate(&self) -> SentinelResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(SentinelError::Config(
                "dispatch.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.max_parallel == 0 {
            return Err(SentinelError::Config(
                "dispatch.max_parallel must be at least 1".into(),
            ));
        }
        if self.log_retention == 0 {
            return Err(SentinelError::Config(
                "dispatch.log_retention must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let monitor = MonitorConfig::default();
        assert_eq!(monitor.close_after_in_bounds, 1);
        assert!(monitor.validate().is_ok());

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.contact_wait(), Duration::from_secs(30));
        assert!(dispatch.validate().is_ok());
    }

    #[test]
    fn test_zero_close_count_rejected() {
        let config = MonitorConfig {
            close_after_in_bounds: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SentinelError::Config(_))));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let config = DispatchConfig {
            max_parallel: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
