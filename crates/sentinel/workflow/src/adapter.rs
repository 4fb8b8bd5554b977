//! Step adapters: the capability seam between the orchestrator and the
//! collaborators that actually do the work (triage, billing, ...).

use async_trait::async_trait;
use sentinel_types::{
    FailurePolicy, SentinelError, SentinelResult, SessionId, StepError, StepErrorKind, StepName,
    StepResult, WorkflowKind,
};
use std::collections::HashMap;
use std::sync::Arc;

/// What an adapter sees when invoked
#[derive(Clone, Debug)]
pub struct StepContext {
    pub session_id: SessionId,
    pub workflow_kind: WorkflowKind,
    pub step: StepName,
    /// 1-based attempt number
    pub attempt: u32,
    /// Case data, including merged override data
    pub input: serde_json::Value,
    /// Successful results of earlier steps
    pub results: HashMap<StepName, StepResult>,
    pub override_data: Option<serde_json::Value>,
}

impl StepContext {
    /// Payload of an earlier step, if it ran
    pub fn result_payload(&self, step: &str) -> Option<&serde_json::Value> {
        self.results.get(&StepName::from(step)).map(|r| &r.payload)
    }

    pub fn is_emergency(&self) -> bool {
        self.override_data.is_some() || self.workflow_kind == WorkflowKind::DeviceEmergency
    }
}

/// Failure raised by an adapter invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepFault {
    /// Collaborator unreachable, timed out, or answered with a transient error
    Transport(String),
    /// The step cannot succeed; never retried
    Fatal(String),
}

impl StepFault {
    pub fn message(&self) -> &str {
        match self {
            StepFault::Transport(m) | StepFault::Fatal(m) => m,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StepFault::Fatal(_))
    }

    /// Classify an unsuccessful result. Refusals and bad input are final;
    /// transport and internal errors may clear on retry.
    pub fn from_step_error(error: &StepError) -> Self {
        match error.kind {
            StepErrorKind::Rejected | StepErrorKind::InvalidInput => {
                StepFault::Fatal(error.message.clone())
            }
            StepErrorKind::Transport | StepErrorKind::Internal => {
                StepFault::Transport(error.message.clone())
            }
        }
    }

    pub fn to_step_error(&self) -> StepError {
        match self {
            StepFault::Transport(m) => StepError::new(StepErrorKind::Transport, m.clone()),
            StepFault::Fatal(m) => StepError::new(StepErrorKind::Rejected, m.clone()),
        }
    }
}

impl std::fmt::Display for StepFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepFault::Transport(m) => write!(f, "transport fault: {}", m),
            StepFault::Fatal(m) => write!(f, "fatal fault: {}", m),
        }
    }
}

/// A collaborator that runs one named step.
///
/// Implementations must be idempotent with respect to a given session and
/// step: the orchestrator may invoke them again after a transport fault.
#[async_trait]
pub trait StepAdapter: Send + Sync {
    /// Adapter name used in logs and health reports
    fn name(&self) -> &str;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Retryable
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepFault>;

    async fn health_check(&self) -> bool {
        true
    }

    async fn shutdown(&self) {}
}

/// Health of one registered adapter
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealth {
    pub step: StepName,
    pub adapter: String,
    pub healthy: bool,
}

/// Step name → adapter binding, read-only once the orchestrator starts
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<StepName, Arc<dyn StepAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an adapter to a step, replacing any previous binding
    pub fn register(&mut self, step: impl Into<StepName>, adapter: Arc<dyn StepAdapter>) {
        let step = step.into();
        tracing::debug!(step = %step, adapter = adapter.name(), "Step adapter registered");
        self.adapters.insert(step, adapter);
    }

    pub fn with(mut self, step: impl Into<StepName>, adapter: Arc<dyn StepAdapter>) -> Self {
        self.register(step, adapter);
        self
    }

    pub fn resolve(&self, step: &StepName) -> SentinelResult<Arc<dyn StepAdapter>> {
        self.adapters
            .get(step)
            .cloned()
            .ok_or_else(|| SentinelError::StepFatalFailure {
                step: step.clone(),
                reason: format!("no adapter registered for step {}", step),
            })
    }

    pub fn contains(&self, step: &StepName) -> bool {
        self.adapters.contains_key(step)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Run every adapter's health check concurrently
    pub async fn health(&self) -> Vec<AdapterHealth> {
        let checks = self.adapters.iter().map(|(step, adapter)| async move {
            AdapterHealth {
                step: step.clone(),
                adapter: adapter.name().to_string(),
                healthy: adapter.health_check().await,
            }
        });
        let mut report = futures::future::join_all(checks).await;
        report.sort_by(|a, b| a.step.as_str().cmp(b.step.as_str()));
        report
    }

    pub async fn shutdown_all(&self) {
        for (step, adapter) in &self.adapters {
            adapter.shutdown().await;
            tracing::debug!(step = %step, "Step adapter shut down");
        }
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut steps: Vec<&str> = self.adapters.keys().map(|s| s.as_str()).collect();
        steps.sort_unstable();
        f.debug_struct("AdapterRegistry").field("steps", &steps).finish()
    }
}

// ── Built-in adapters ────────────────────────────────────────────────

/// Adapter that always succeeds with a fixed payload
pub struct StaticAdapter {
    name: String,
    payload: serde_json::Value,
}

impl StaticAdapter {
    pub fn new(step: impl Into<StepName>, payload: serde_json::Value) -> Self {
        let step: StepName = step.into();
        Self {
            name: format!("{}-static", step),
            payload,
        }
    }
}

#[async_trait]
impl StepAdapter for StaticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepFault> {
        Ok(StepResult::success(ctx.step.clone(), self.payload.clone()))
    }
}

type StepFn = dyn Fn(&StepContext) -> Result<serde_json::Value, StepFault> + Send + Sync;

/// Adapter backed by a closure over the invocation context
pub struct FnAdapter {
    name: String,
    policy: FailurePolicy,
    f: Box<StepFn>,
}

impl FnAdapter {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<serde_json::Value, StepFault> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            policy: FailurePolicy::Retryable,
            f: Box::new(f),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl StepAdapter for FnAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepFault> {
        (self.f)(ctx).map(|payload| StepResult::success(ctx.step.clone(), payload))
    }
}
