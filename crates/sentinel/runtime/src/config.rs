//! Configuration for the MediSentinel runtime

use sentinel_telemetry::{DispatchConfig, MonitorConfig};
use sentinel_types::{SentinelError, SentinelResult};
use sentinel_workflow::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Step invocation and session commits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Threshold evaluation and event bookkeeping
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Contact fan-out
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Audit sink
    #[serde(default)]
    pub audit: AuditConfig,

    /// Reaction to exhausted notifications
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where audit entries go
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuditConfig {
    /// In-memory sink (development/testing)
    #[default]
    Memory,

    /// Append-only JSON lines file
    File {
        path: PathBuf,
    },
}

/// What happens when no contact could be reached for an emergency event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Apply an emergency override to sessions bound to the device
    #[serde(default = "default_true")]
    pub override_bound_sessions: bool,

    /// Start a device-emergency workflow when no session is bound
    #[serde(default = "default_true")]
    pub start_device_emergency: bool,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            override_bound_sessions: true,
            start_device_emergency: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SentinelConfig {
    /// Load configuration: defaults, then the file if given, then
    /// `SENTINEL_`-prefixed environment variables
    /// (`SENTINEL_MONITOR__CLOSE_AFTER_IN_BOUNDS=2`).
    pub fn load(path: Option<&Path>) -> SentinelResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(
            config::Config::try_from(&SentinelConfig::default()).map_err(config_error)?,
        );

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SENTINEL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: SentinelConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SentinelResult<()> {
        self.orchestrator.validate()?;
        self.monitor.validate()?;
        self.dispatch.validate()?;
        if let AuditConfig::File { path } = &self.audit {
            if path.as_os_str().is_empty() {
                return Err(SentinelError::Config("audit.path must not be empty".into()));
            }
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> SentinelError {
    SentinelError::Config(e.to_string())
}
