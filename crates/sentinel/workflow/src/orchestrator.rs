//! Orchestrator: drives sessions through their step plans
//!
//! Each session moves `pending → running → {completed | step_failed |
//! overridden | aborted}`. The orchestrator never holds a lock across an
//! adapter call. Every write is a compare-and-update against the version it
//! read, so an abort or override that lands while a step is in flight wins
//! and the late result is discarded.

use crate::adapter::{AdapterHealth, AdapterRegistry, StepContext, StepFault};
use crate::catalog::WorkflowCatalog;
use crate::config::OrchestratorConfig;
use crate::store::SessionStore;
use chrono::Utc;
use dashmap::DashMap;
use sentinel_audit::{AuditTrail, PartialAuditEntry};
use sentinel_types::{
    FailurePolicy, SentinelError, SentinelResult, Session, SessionId, SessionStatus, SessionView,
    StepFailure, StepName, StepResult, WorkflowKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

const ACTOR: &str = "orchestrator";

/// Outcome of running one step to a conclusion
enum StepRun {
    Succeeded(StepResult),
    Failed(StepFailure),
    /// The session moved on while the step was in flight
    Interrupted,
}

struct Inner {
    catalog: Arc<WorkflowCatalog>,
    adapters: AdapterRegistry,
    store: Arc<dyn SessionStore>,
    audit: AuditTrail,
    config: OrchestratorConfig,
    /// Sessions that currently have a driver task
    drivers: DashMap<SessionId, ()>,
    events: broadcast::Sender<SessionView>,
}

/// Runs sessions against the catalog and the registered adapters
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<WorkflowCatalog>,
        adapters: AdapterRegistry,
        store: Arc<dyn SessionStore>,
        audit: AuditTrail,
        config: OrchestratorConfig,
    ) -> SentinelResult<Self> {
        config.validate()?;

        for step in catalog.step_names() {
            if !adapters.contains(&step) {
                warn!(step = %step, "No adapter registered for catalog step");
            }
        }

        let (events, _) = broadcast::channel(config.event_buffer);
        Ok(Self {
            inner: Arc::new(Inner {
                catalog,
                adapters,
                store,
                audit,
                config,
                drivers: DashMap::new(),
                events,
            }),
        })
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.inner.catalog
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Views of sessions after every committed transition
    pub fn subscribe(&self) -> broadcast::Receiver<SessionView> {
        self.inner.events.subscribe()
    }

    // ── Session Lifecycle ────────────────────────────────────────────

    /// Create a `pending` session for a workflow kind
    pub async fn create_session(
        &self,
        kind: WorkflowKind,
        input: serde_json::Value,
    ) -> SentinelResult<Session> {
        let definition = self.inner.catalog.lookup(kind)?;
        let session = self.inner.store.create(definition, input).await?;

        info!(
            session_id = %session.id,
            workflow = %kind,
            steps = session.steps.len(),
            "Session created"
        );
        self.record(None, &session, None, None).await;
        Ok(session)
    }

    /// `pending → running`
    pub async fn start(&self, id: &SessionId) -> SentinelResult<Session> {
        for _ in 0..self.inner.config.max_cas_retries {
            let session = self.inner.store.get(id).await?;
            if session.status != SessionStatus::Pending {
                return Err(SentinelError::InvalidTransition {
                    session_id: id.clone(),
                    status: session.status,
                    action: "start",
                });
            }

            let mut next = session.clone();
            next.status = SessionStatus::Running;
            next.cursor = 0;
            next.touch();

            if self.commit(&session, &next).await? {
                info!(session_id = %id, workflow = %next.workflow_kind, "Session started");
                self.record(Some(session.status), &next, None, None).await;
                return Ok(next);
            }
        }
        Err(SentinelError::ConcurrentModification(id.clone()))
    }

    /// Create, start, and drive a session in the background
    pub async fn start_workflow(
        &self,
        kind: WorkflowKind,
        input: serde_json::Value,
    ) -> SentinelResult<SessionId> {
        let session = self.create_session(kind, input).await?;
        self.start(&session.id).await?;
        self.spawn_driver(&session.id);
        Ok(session.id)
    }

    /// Run steps until the session leaves `running` or the plan ends.
    ///
    /// Returns the session as last persisted.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn advance(&self, id: &SessionId) -> SentinelResult<Session> {
        loop {
            let session = self.inner.store.get(id).await?;
            if session.status != SessionStatus::Running {
                return Ok(session);
            }

            let Some(step) = session.current_step().cloned() else {
                if let Some(done) = self.finish(&session).await? {
                    return Ok(done);
                }
                continue;
            };

            match self.run_step(&session, &step).await? {
                StepRun::Succeeded(result) => self.commit_result(session, &step, result).await?,
                StepRun::Failed(failure) => self.commit_failure(session, &step, failure).await?,
                StepRun::Interrupted => {
                    debug!(step = %step, "Step interrupted by concurrent transition");
                }
            }
        }
    }

    /// Replace the remaining plan with the emergency ordering and resume.
    ///
    /// Re-applying a structurally equal payload returns the session
    /// unchanged, whatever its status.
    pub async fn emergency_override(
        &self,
        id: &SessionId,
        data: serde_json::Value,
    ) -> SentinelResult<Session> {
        for _ in 0..self.inner.config.max_cas_retries {
            let session = self.inner.store.get(id).await?;

            if let Some(applied) = &session.emergency_override {
                if applied.payload == data {
                    debug!(session_id = %id, "Emergency override already applied");
                    return Ok(session);
                }
                return Err(SentinelError::OverrideConflict(id.clone()));
            }

            if !matches!(
                session.status,
                SessionStatus::Running | SessionStatus::StepFailed
            ) {
                return Err(SentinelError::InvalidTransition {
                    session_id: id.clone(),
                    status: session.status,
                    action: "override",
                });
            }

            let mut next = session.clone();
            next.apply_override(self.inner.catalog.emergency_sequence(), data.clone());
            next.touch();

            if self.commit(&session, &next).await? {
                warn!(
                    session_id = %id,
                    at_cursor = next.cursor,
                    remaining = next.remaining_steps().len(),
                    "Emergency override applied"
                );
                self.record(
                    Some(session.status),
                    &next,
                    None,
                    Some("emergency override applied".to_string()),
                )
                .await;
                self.spawn_driver(id);
                return Ok(next);
            }
        }
        Err(SentinelError::ConcurrentModification(id.clone()))
    }

    /// Stop a session; any result still in flight is discarded
    pub async fn abort(&self, id: &SessionId, reason: impl Into<String>) -> SentinelResult<Session> {
        let reason = reason.into();
        for _ in 0..self.inner.config.max_cas_retries {
            let session = self.inner.store.get(id).await?;
            if !matches!(
                session.status,
                SessionStatus::Pending | SessionStatus::Running | SessionStatus::StepFailed
            ) {
                return Err(SentinelError::InvalidTransition {
                    session_id: id.clone(),
                    status: session.status,
                    action: "abort",
                });
            }

            let mut next = session.clone();
            next.status = SessionStatus::Aborted;
            next.abort_reason = Some(reason.clone());
            next.touch();

            if self.commit(&session, &next).await? {
                info!(session_id = %id, reason = %reason, "Session aborted");
                self.record(Some(session.status), &next, next.current_step().cloned(), Some(reason))
                    .await;
                return Ok(next);
            }
        }
        Err(SentinelError::ConcurrentModification(id.clone()))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get_session(&self, id: &SessionId) -> SentinelResult<Session> {
        self.inner.store.get(id).await
    }

    pub async fn session_view(&self, id: &SessionId) -> SentinelResult<SessionView> {
        Ok(self.inner.store.get(id).await?.view())
    }

    pub async fn list_sessions(&self) -> SentinelResult<Vec<SessionView>> {
        let mut views: Vec<SessionView> = self
            .inner
            .store
            .list()
            .await?
            .iter()
            .map(Session::view)
            .collect();
        views.sort_by_key(|v| v.created_at);
        Ok(views)
    }

    /// Wait until the session needs no further driving
    pub async fn wait_until_settled(&self, id: &SessionId) -> SentinelResult<Session> {
        let mut rx = self.inner.events.subscribe();
        loop {
            let session = self.inner.store.get(id).await?;
            if session.status.is_settled() {
                return Ok(session);
            }
            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(session),
            }
        }
    }

    // ── Housekeeping ─────────────────────────────────────────────────

    /// Remove a settled session from the store
    pub async fn archive(&self, id: &SessionId) -> SentinelResult<Session> {
        let session = self.inner.store.get(id).await?;
        if !session.status.is_settled() {
            return Err(SentinelError::InvalidTransition {
                session_id: id.clone(),
                status: session.status,
                action: "archive",
            });
        }
        self.inner.store.delete(id).await?;
        info!(session_id = %id, status = %session.status, "Session archived");
        Ok(session)
    }

    /// Delete settled sessions not updated within `retention`
    pub async fn purge_settled(&self, retention: Duration) -> SentinelResult<usize> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| SentinelError::Config(format!("invalid retention: {}", e)))?;
        let cutoff = Utc::now() - retention;

        let mut purged = 0;
        for session in self.inner.store.list().await? {
            if session.status.is_settled()
                && session.updated_at < cutoff
                && self.inner.store.delete(&session.id).await?
            {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, "Purged settled sessions");
        }
        Ok(purged)
    }

    pub async fn agent_health(&self) -> Vec<AdapterHealth> {
        self.inner.adapters.health().await
    }

    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.inner.adapters.shutdown_all().await;
        self.inner.audit.flush().await;
    }

    // ── Driver ───────────────────────────────────────────────────────

    /// Spawn a task advancing the session unless one is already running
    pub fn spawn_driver(&self, id: &SessionId) {
        if self.inner.drivers.insert(id.clone(), ()).is_some() {
            debug!(session_id = %id, "Session already has a driver");
            return;
        }

        let this = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = this.advance(&id).await {
                    error!(session_id = %id, error = %e, "Session driver stopped");
                }
                this.inner.drivers.remove(&id);

                // A resume may have raced with this driver's exit
                let resumable = matches!(
                    this.inner.store.get(&id).await,
                    Ok(s) if s.status == SessionStatus::Running
                );
                if !resumable || this.inner.drivers.insert(id.clone(), ()).is_some() {
                    break;
                }
            }
        });
    }

    // ── Step Execution ───────────────────────────────────────────────

    async fn run_step(&self, session: &Session, step: &StepName) -> SentinelResult<StepRun> {
        let adapter = match self.inner.adapters.resolve(step) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(session_id = %session.id, step = %step, "No adapter for step");
                return Ok(StepRun::Failed(StepFailure::fatal(step.clone(), e.to_string())));
            }
        };

        let retry = &self.inner.config.retry;
        let mut attempt = 1;
        let mut current = session.clone();

        loop {
            let ctx = StepContext {
                session_id: current.id.clone(),
                workflow_kind: current.workflow_kind,
                step: step.clone(),
                attempt,
                input: current.input.clone(),
                results: current.context.clone(),
                override_data: current.emergency_override.as_ref().map(|o| o.payload.clone()),
            };

            let started = tokio::time::Instant::now();
            // The call runs on its own task; a timeout stops waiting for it
            // but lets it run to completion, and its result is dropped
            let call = tokio::spawn({
                let adapter = adapter.clone();
                async move { adapter.execute(&ctx).await }
            });
            let outcome = match tokio::time::timeout(self.inner.config.step_timeout(), call).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => Err(StepFault::Transport(format!("adapter task failed: {}", e))),
                Err(_) => {
                    warn!(
                        session_id = %current.id,
                        step = %step,
                        attempt,
                        "Step timed out, call left to finish detached"
                    );
                    Err(StepFault::Transport(format!(
                        "timed out after {}ms",
                        self.inner.config.step_timeout_ms
                    )))
                }
            };

            let fault = match outcome {
                Ok(mut result) if result.succeeded => {
                    result.step_name = step.clone();
                    debug!(
                        session_id = %current.id,
                        step = %step,
                        attempt,
                        "Step succeeded"
                    );
                    return Ok(StepRun::Succeeded(result.with_duration(started.elapsed())));
                }
                Ok(result) => match &result.error {
                    Some(error) => StepFault::from_step_error(error),
                    None => StepFault::Transport(result.reason()),
                },
                Err(fault) => fault,
            };

            if fault.is_fatal() || adapter.failure_policy() == FailurePolicy::Fatal {
                return Ok(StepRun::Failed(StepFailure::fatal(
                    step.clone(),
                    fault.message(),
                )));
            }
            if !retry.allows_retry(attempt) {
                return Ok(StepRun::Failed(StepFailure::exhausted(
                    step.clone(),
                    attempt,
                    fault.message(),
                )));
            }

            let delay = retry.delay_after(attempt);
            warn!(
                session_id = %current.id,
                step = %step,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %fault,
                "Step failed, retrying"
            );
            tokio::time::sleep(delay).await;

            // Checkpoint: abort or re-plan between attempts ends the run
            current = self.inner.store.get(&session.id).await?;
            if !still_pending(&current, step) {
                return Ok(StepRun::Interrupted);
            }
            attempt += 1;
        }
    }

    async fn commit_result(
        &self,
        snapshot: Session,
        step: &StepName,
        result: StepResult,
    ) -> SentinelResult<()> {
        let mut current = snapshot;
        for _ in 0..self.inner.config.max_cas_retries {
            if !still_pending(&current, step) {
                debug!(session_id = %current.id, step = %step, "Discarding stale step result");
                return Ok(());
            }

            let mut next = current.clone();
            next.record_current(result.clone());
            next.touch();

            if self.commit(&current, &next).await? {
                info!(
                    session_id = %next.id,
                    step = %step,
                    cursor = next.cursor,
                    duration_ms = result.duration.as_millis() as u64,
                    "Step completed"
                );
                self.record(Some(current.status), &next, Some(step.clone()), None)
                    .await;
                return Ok(());
            }
            current = self.inner.store.get(&current.id).await?;
        }
        Err(SentinelError::ConcurrentModification(current.id))
    }

    async fn commit_failure(
        &self,
        snapshot: Session,
        step: &StepName,
        failure: StepFailure,
    ) -> SentinelResult<()> {
        let mut current = snapshot;
        for _ in 0..self.inner.config.max_cas_retries {
            if !still_pending(&current, step) {
                debug!(session_id = %current.id, step = %step, "Discarding stale step failure");
                return Ok(());
            }

            let mut next = current.clone();
            next.status = SessionStatus::StepFailed;
            next.failure = Some(failure.clone());
            next.touch();

            if self.commit(&current, &next).await? {
                error!(
                    session_id = %next.id,
                    step = %step,
                    reason = %failure.reason,
                    "Step failed"
                );
                self.record(
                    Some(current.status),
                    &next,
                    Some(step.clone()),
                    Some(failure.to_error().to_string()),
                )
                .await;
                return Ok(());
            }
            current = self.inner.store.get(&current.id).await?;
        }
        Err(SentinelError::ConcurrentModification(current.id))
    }

    /// Close out a running session whose plan is exhausted.
    ///
    /// `None` means the write was stale and the caller should re-read.
    async fn finish(&self, session: &Session) -> SentinelResult<Option<Session>> {
        let mut next = session.clone();
        next.status = if session.emergency_override.is_some() {
            SessionStatus::Overridden
        } else {
            SessionStatus::Completed
        };
        next.touch();

        if !self.commit(session, &next).await? {
            return Ok(None);
        }

        info!(
            session_id = %next.id,
            status = %next.status,
            steps = next.context.len(),
            "Session finished"
        );
        self.record(Some(session.status), &next, None, None).await;
        Ok(Some(next))
    }

    async fn commit(&self, current: &Session, next: &Session) -> SentinelResult<bool> {
        self.inner
            .store
            .compare_and_update(&current.id, current.updated_at, next.clone())
            .await
    }

    async fn record(
        &self,
        prior: Option<SessionStatus>,
        session: &Session,
        step: Option<StepName>,
        detail: Option<String>,
    ) {
        self.inner
            .audit
            .record(PartialAuditEntry::session_transition(
                ACTOR, prior, session, step, detail,
            ))
            .await;
        // No subscribers is fine
        let _ = self.inner.events.send(session.view());
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapters", &self.inner.adapters)
            .field("drivers", &self.inner.drivers.len())
            .finish()
    }
}

/// The session is still waiting on exactly this step
fn still_pending(session: &Session, step: &StepName) -> bool {
    session.status == SessionStatus::Running
        && session.current_step() == Some(step)
        && !session.has_result(step)
}
