//! Workflow kinds, step names and definitions
//!
//! A workflow definition is a fixed ordering over a shared step vocabulary.
//! Definitions are immutable once loaded into a catalog.

use crate::{SentinelError, SentinelResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ── Workflow Kind ────────────────────────────────────────────────────

/// The kinds of case workflow the platform runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    /// Walk-in or ambulance emergency, triage first
    EmergencyIntake,
    /// Planned admission, paperwork first
    ScheduledIntake,
    /// A clinician scanning a patient's smart device
    DeviceScan,
    /// Emergency raised by device telemetry; also the override ordering
    DeviceEmergency,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 4] = [
        WorkflowKind::EmergencyIntake,
        WorkflowKind::ScheduledIntake,
        WorkflowKind::DeviceScan,
        WorkflowKind::DeviceEmergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::EmergencyIntake => "emergency-intake",
            WorkflowKind::ScheduledIntake => "scheduled-intake",
            WorkflowKind::DeviceScan => "device-scan",
            WorkflowKind::DeviceEmergency => "device-emergency",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SentinelError::UnknownWorkflow(s.to_string()))
    }
}

// ── Step Name ────────────────────────────────────────────────────────

/// Name of a single unit of work delegated to an external collaborator
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(pub String);

impl StepName {
    pub const TRIAGE: &'static str = "triage";
    pub const ADMISSION: &'static str = "admission";
    pub const LEGAL: &'static str = "legal";
    pub const MEDICAL_RECORDS: &'static str = "medical_records";
    pub const SMART_HEALTH_DEVICE: &'static str = "smart_health_device";
    pub const BILLING: &'static str = "billing";
    pub const COMMUNICATION: &'static str = "communication";
    pub const SCHEDULING: &'static str = "scheduling";

    /// The full step vocabulary shared by every workflow kind
    pub const VOCABULARY: [&'static str; 8] = [
        Self::TRIAGE,
        Self::ADMISSION,
        Self::LEGAL,
        Self::MEDICAL_RECORDS,
        Self::SMART_HEALTH_DEVICE,
        Self::BILLING,
        Self::COMMUNICATION,
        Self::SCHEDULING,
    ];

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// An ordered pipeline of steps for one workflow kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub kind: WorkflowKind,
    pub steps: Vec<StepName>,
}

impl WorkflowDefinition {
    /// Create a definition, rejecting empty or repeating step lists.
    ///
    /// A step result is keyed by step name, so a name may appear at most
    /// once in a pipeline.
    pub fn new(kind: WorkflowKind, steps: Vec<StepName>) -> SentinelResult<Self> {
        if steps.is_empty() {
            return Err(SentinelError::Config(format!(
                "workflow '{}' has no steps",
                kind
            )));
        }
        for (i, step) in steps.iter().enumerate() {
            if steps[..i].contains(step) {
                return Err(SentinelError::Config(format!(
                    "workflow '{}' lists step '{}' more than once",
                    kind, step
                )));
            }
        }
        Ok(Self { kind, steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn position(&self, step: &StepName) -> Option<usize> {
        self.steps.iter().position(|s| s == step)
    }
}
