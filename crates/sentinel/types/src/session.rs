//! Sessions: one case's run through a workflow
//!
//! A Session tracks the runtime state of a case: its step plan, the cursor
//! into that plan, the results recorded so far, and its lifecycle status.
//! The orchestrator owns a session while it is `running`; anyone may read it.

use crate::{SessionId, StepFailure, StepName, StepResult, WorkflowDefinition, WorkflowKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Session Status ───────────────────────────────────────────────────

/// Lifecycle status of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    StepFailed,
    Overridden,
    Completed,
    Aborted,
}

impl SessionStatus {
    /// No further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Overridden | SessionStatus::Aborted
        )
    }

    /// Nothing will advance the session without external action
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == SessionStatus::StepFailed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::StepFailed => "step_failed",
            SessionStatus::Overridden => "overridden",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Override Record ──────────────────────────────────────────────────

/// The emergency override applied to a session, kept for idempotence
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub payload: serde_json::Value,
    pub applied_at: DateTime<Utc>,
    /// Cursor position at which the plan was replaced
    pub at_cursor: usize,
}

// ── Session ──────────────────────────────────────────────────────────

/// A case's run through a workflow
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub workflow_kind: WorkflowKind,
    /// The step plan; starts as the catalog ordering, replaced on override
    pub steps: Vec<StepName>,
    /// Index of the next step to run; never exceeds `steps.len()`
    pub cursor: usize,
    pub status: SessionStatus,
    /// Successful results keyed by step
    pub context: HashMap<StepName, StepResult>,
    /// Case data supplied at start, plus merged override data
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_override: Option<OverrideRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a pending session for a workflow definition
    pub fn new(definition: &WorkflowDefinition, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            workflow_kind: definition.kind,
            steps: definition.steps.clone(),
            cursor: 0,
            status: SessionStatus::Pending,
            context: HashMap::new(),
            input,
            emergency_override: None,
            failure: None,
            abort_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance `updated_at`, strictly past its previous value.
    ///
    /// The store's compare-and-update keys on this timestamp, so two
    /// successive versions must never share one.
    pub fn touch(&mut self) {
        let now = Utc::now();
        let floor = self.updated_at + ChronoDuration::microseconds(1);
        self.updated_at = if now > floor { now } else { floor };
    }

    pub fn current_step(&self) -> Option<&StepName> {
        self.steps.get(self.cursor)
    }

    pub fn remaining_steps(&self) -> &[StepName] {
        &self.steps[self.cursor.min(self.steps.len())..]
    }

    pub fn has_result(&self, step: &StepName) -> bool {
        self.context.contains_key(step)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_plan_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Record the result of the step under the cursor and move past it.
    ///
    /// Returns `false` without changing anything if the result is for a
    /// different step, or that step already has a result.
    pub fn record_current(&mut self, result: StepResult) -> bool {
        match self.current_step() {
            Some(step) if *step == result.step_name && !self.has_result(step) => {
                self.context.insert(result.step_name.clone(), result);
                self.cursor += 1;
                true
            }
            _ => false,
        }
    }

    /// Replace the remaining plan with the emergency ordering.
    ///
    /// The executed prefix and the cursor are kept; emergency steps that
    /// already have a result are not run again. Object keys of `payload`
    /// are merged into the case input.
    pub fn apply_override(&mut self, emergency_steps: &[StepName], payload: serde_json::Value) {
        let mut plan: Vec<StepName> = self.steps[..self.cursor].to_vec();
        for step in emergency_steps {
            if !self.has_result(step) && !plan.contains(step) {
                plan.push(step.clone());
            }
        }
        self.steps = plan;

        if let serde_json::Value::Object(extra) = &payload {
            match &mut self.input {
                serde_json::Value::Object(input) => {
                    for (k, v) in extra {
                        input.insert(k.clone(), v.clone());
                    }
                }
                other => {
                    let mut merged = extra.clone();
                    if !other.is_null() {
                        merged.insert("initial_input".to_string(), other.clone());
                    }
                    *other = serde_json::Value::Object(merged);
                }
            }
        }

        self.emergency_override = Some(OverrideRecord {
            payload,
            applied_at: Utc::now(),
            at_cursor: self.cursor,
        });
        self.failure = None;
        self.status = SessionStatus::Running;
    }

    /// Caller-facing summary of the session
    pub fn view(&self) -> SessionView {
        let outcome = match self.status {
            SessionStatus::Pending | SessionStatus::Running => SessionOutcome::InProgress {
                step: self.current_step().cloned(),
            },
            SessionStatus::Completed => SessionOutcome::Succeeded,
            SessionStatus::Overridden => SessionOutcome::Overridden,
            SessionStatus::StepFailed => {
                let (step, reason) = self
                    .failure
                    .as_ref()
                    .map(|f| (f.step.clone(), f.reason.clone()))
                    .unwrap_or_else(|| {
                        (
                            self.current_step().cloned().unwrap_or_else(|| StepName::from("unknown")),
                            String::new(),
                        )
                    });
                SessionOutcome::Failed { step, reason }
            }
            SessionStatus::Aborted => SessionOutcome::Aborted {
                reason: self.abort_reason.clone().unwrap_or_default(),
            },
        };

        let mut completed_steps: Vec<StepName> = self
            .steps
            .iter()
            .filter(|s| self.has_result(s))
            .cloned()
            .collect();
        // Results recorded before an override may fall outside the new plan
        for step in self.context.keys() {
            if !completed_steps.contains(step) {
                completed_steps.push(step.clone());
            }
        }

        SessionView {
            session_id: self.id.clone(),
            workflow_kind: self.workflow_kind,
            status: self.status,
            outcome,
            cursor: self.cursor,
            total_steps: self.steps.len(),
            completed_steps,
            overridden: self.emergency_override.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ── Session View ─────────────────────────────────────────────────────

/// What a status query reports
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionOutcome {
    InProgress { step: Option<StepName> },
    Succeeded,
    Failed { step: StepName, reason: String },
    Overridden,
    Aborted { reason: String },
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::InProgress { step: Some(step) } => write!(f, "in progress ({})", step),
            SessionOutcome::InProgress { step: None } => write!(f, "in progress"),
            SessionOutcome::Succeeded => write!(f, "succeeded"),
            SessionOutcome::Failed { step, reason } => {
                write!(f, "failed - step {}, reason {}", step, reason)
            }
            SessionOutcome::Overridden => write!(f, "overridden"),
            SessionOutcome::Aborted { reason } => write!(f, "aborted - reason {}", reason),
        }
    }
}

/// Read-only projection of a session for the API layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub workflow_kind: WorkflowKind,
    pub status: SessionStatus,
    pub outcome: SessionOutcome,
    pub cursor: usize,
    pub total_steps: usize,
    pub completed_steps: Vec<StepName>,
    pub overridden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
