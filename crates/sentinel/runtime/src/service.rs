//! The MediSentinel service facade
//!
//! [`Sentinel`] wires the orchestrator, the telemetry monitor, the
//! notification dispatcher and the audit trail together, and runs the
//! escalation task that turns an exhausted notification into an
//! emergency override.

use crate::builtin::builtin_adapters;
use crate::config::{AuditConfig, EscalationConfig, SentinelConfig};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use sentinel_audit::{AuditTrail, FileAuditSink, MemoryAuditSink};
use sentinel_telemetry::{
    ChannelSet, DeviceRegistry, DispatchReport, EmergencyAssessment,
    IngestReport, NotificationDispatcher, TelemetryEvent, TelemetryMonitor, VitalsFeed,
    VitalsSubscription,
};
use sentinel_types::{
    Device, DeviceId, DeviceRegistration, EmergencyContact, EmergencyEvent, EventId, Session,
    SentinelError, SentinelResult, SessionId, SessionStatus, SessionView, VitalName, VitalSample,
    WorkflowKind,
};
use sentinel_workflow::{
    AdapterHealth, AdapterRegistry, InMemorySessionStore, Orchestrator, SessionStore,
    WorkflowCatalog,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything known about one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device: Device,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<VitalSample>,
    pub open_events: Vec<EmergencyEvent>,
    pub recent_events: Vec<EmergencyEvent>,
    pub bound_sessions: Vec<SessionId>,
}

/// What the escalation task did for one exhausted dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    pub overridden: Vec<SessionId>,
    /// Bound cases already carrying an emergency response
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub already_escalated: Vec<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<SessionId>,
}

/// Device → cases it is bound to
type Bindings = Arc<DashMap<DeviceId, Vec<SessionId>>>;

// ── Builder ──────────────────────────────────────────────────────────

/// Assembles a [`Sentinel`]; unset parts fall back to the built-ins.
#[derive(Default)]
pub struct SentinelBuilder {
    config: SentinelConfig,
    catalog: Option<WorkflowCatalog>,
    adapters: Option<AdapterRegistry>,
    channels: Option<ChannelSet>,
    store: Option<Arc<dyn SessionStore>>,
    audit: Option<AuditTrail>,
}

impl SentinelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SentinelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(mut self, catalog: WorkflowCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replace the built-in adapters entirely
    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn channels(mut self, channels: ChannelSet) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit(mut self, audit: AuditTrail) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the service and start its escalation task
    pub async fn build(self) -> SentinelResult<Sentinel> {
        let config = self.config;
        config.validate()?;

        let audit = match self.audit {
            Some(audit) => audit,
            None => open_audit(&config.audit).await?,
        };

        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = NotificationDispatcher::new(
            registry.clone(),
            self.channels.unwrap_or_else(ChannelSet::logging),
            audit.clone(),
            config.dispatch.clone(),
        )?;
        let monitor = TelemetryMonitor::new(registry, dispatcher, config.monitor.clone())?;

        let adapters = self
            .adapters
            .unwrap_or_else(|| builtin_adapters(monitor.clone()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let orchestrator = Orchestrator::new(
            Arc::new(self.catalog.unwrap_or_default()),
            adapters,
            store,
            audit.clone(),
            config.orchestrator.clone(),
        )?;

        let bindings: Bindings = Arc::new(DashMap::new());
        let escalator = Escalator {
            orchestrator: orchestrator.clone(),
            bindings: bindings.clone(),
            config: config.escalation.clone(),
        };
        let escalation = tokio::spawn(escalator.run(monitor.escalations()));

        info!(
            audit = ?config.audit,
            close_after_in_bounds = config.monitor.close_after_in_bounds,
            contact_wait_ms = config.dispatch.contact_wait_ms,
            "MediSentinel started"
        );

        Ok(Sentinel {
            feed: VitalsFeed::new(monitor.clone()),
            orchestrator,
            monitor,
            audit,
            bindings,
            config,
            escalation: Mutex::new(Some(escalation)),
        })
    }
}

async fn open_audit(config: &AuditConfig) -> SentinelResult<AuditTrail> {
    Ok(match config {
        AuditConfig::Memory => AuditTrail::new(Arc::new(MemoryAuditSink::new())),
        AuditConfig::File { path } => AuditTrail::new(Arc::new(FileAuditSink::open(path).await?)),
    })
}

// ── Service ──────────────────────────────────────────────────────────

/// Upward operations exposed to API layers
pub struct Sentinel {
    orchestrator: Orchestrator,
    monitor: TelemetryMonitor,
    feed: VitalsFeed,
    audit: AuditTrail,
    bindings: Bindings,
    config: SentinelConfig,
    escalation: Mutex<Option<JoinHandle<()>>>,
}

impl Sentinel {
    pub fn builder() -> SentinelBuilder {
        SentinelBuilder::new()
    }

    /// Service with built-in adapters and logging channels
    pub async fn from_config(config: SentinelConfig) -> SentinelResult<Self> {
        SentinelBuilder::new().config(config).build().await
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn monitor(&self) -> &TelemetryMonitor {
        &self.monitor
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    // ── Workflows ────────────────────────────────────────────────────

    /// Start a case. A string `device_id` in the input binds that device.
    pub async fn start_workflow(
        &self,
        kind: WorkflowKind,
        input: serde_json::Value,
    ) -> SentinelResult<SessionId> {
        let device_id = input
            .get("device_id")
            .and_then(|v| v.as_str())
            .map(DeviceId::new);
        if let Some(device_id) = &device_id {
            self.monitor.registry().get(device_id)?;
        }

        let session_id = self.orchestrator.start_workflow(kind, input).await?;
        if let Some(device_id) = device_id {
            bind(&self.bindings, device_id, session_id.clone());
        }
        Ok(session_id)
    }

    pub async fn session_status(&self, id: &SessionId) -> SentinelResult<SessionView> {
        self.orchestrator.session_view(id).await
    }

    pub async fn emergency_override(
        &self,
        id: &SessionId,
        data: serde_json::Value,
    ) -> SentinelResult<Session> {
        self.orchestrator.emergency_override(id, data).await
    }

    pub async fn abort_workflow(
        &self,
        id: &SessionId,
        reason: impl Into<String>,
    ) -> SentinelResult<Session> {
        self.orchestrator.abort(id, reason).await
    }

    /// Archive a settled session and drop its device bindings
    pub async fn complete_workflow(&self, id: &SessionId) -> SentinelResult<Session> {
        let session = self.orchestrator.archive(id).await?;
        for mut entry in self.bindings.iter_mut() {
            entry.value_mut().retain(|s| s != id);
        }
        self.bindings.retain(|_, sessions| !sessions.is_empty());
        Ok(session)
    }

    pub async fn wait_until_settled(&self, id: &SessionId) -> SentinelResult<Session> {
        self.orchestrator.wait_until_settled(id).await
    }

    pub async fn agent_health(&self) -> Vec<AdapterHealth> {
        self.orchestrator.agent_health().await
    }

    pub fn subscribe_sessions(&self) -> broadcast::Receiver<SessionView> {
        self.orchestrator.subscribe()
    }

    // ── Devices ──────────────────────────────────────────────────────

    pub fn register_device(&self, registration: DeviceRegistration) -> SentinelResult<Device> {
        self.monitor.registry().register(registration)
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.monitor.registry().list()
    }

    pub fn add_emergency_contact(
        &self,
        device_id: &DeviceId,
        contact: EmergencyContact,
    ) -> SentinelResult<Device> {
        self.monitor.registry().add_contact(device_id, contact)
    }

    pub fn get_emergency_contacts(
        &self,
        device_id: &DeviceId,
    ) -> SentinelResult<Vec<EmergencyContact>> {
        self.monitor.registry().get_contacts(device_id)
    }

    pub async fn device_status(&self, device_id: &DeviceId) -> SentinelResult<DeviceStatus> {
        Ok(DeviceStatus {
            device: self.monitor.registry().get(device_id)?,
            latest: self.monitor.latest_readings(device_id).await?,
            open_events: self.monitor.open_events(device_id).await?,
            recent_events: self.monitor.recent_events(device_id).await?,
            bound_sessions: self
                .bindings
                .get(device_id)
                .map(|s| s.value().clone())
                .unwrap_or_default(),
        })
    }

    /// Bind a device to a case so its exhausted alerts escalate into it
    pub async fn bind_device_session(
        &self,
        device_id: &DeviceId,
        session_id: &SessionId,
    ) -> SentinelResult<()> {
        self.monitor.registry().get(device_id)?;
        self.orchestrator.get_session(session_id).await?;
        bind(&self.bindings, device_id.clone(), session_id.clone());
        info!(device_id = %device_id, session_id = %session_id, "Device bound to session");
        Ok(())
    }

    // ── Telemetry ────────────────────────────────────────────────────

    pub async fn ingest(&self, sample: VitalSample) -> SentinelResult<IngestReport> {
        self.monitor.ingest(sample).await
    }

    /// Ingest readings stamped with the current time
    pub async fn update_vital_signs(
        &self,
        device_id: &DeviceId,
        readings: HashMap<VitalName, f64>,
    ) -> SentinelResult<IngestReport> {
        self.monitor
            .ingest(VitalSample {
                device_id: device_id.clone(),
                timestamp: Utc::now(),
                readings,
            })
            .await
    }

    pub async fn check_emergency_conditions(
        &self,
        device_id: &DeviceId,
    ) -> SentinelResult<EmergencyAssessment> {
        self.monitor.check_emergency_conditions(device_id).await
    }

    pub async fn acknowledge_event(&self, event_id: &EventId) -> SentinelResult<EmergencyEvent> {
        self.monitor.acknowledge(event_id).await
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.monitor.subscribe()
    }

    pub fn subscribe_vitals(
        &self,
        device_id: &DeviceId,
        interval: Duration,
    ) -> SentinelResult<VitalsSubscription> {
        self.feed.subscribe(device_id, interval)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn shutdown(&self) {
        info!("Shutting down MediSentinel");
        if let Some(handle) = self.escalation.lock().take() {
            handle.abort();
        }
        self.orchestrator.shutdown().await;
    }
}

impl std::fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sentinel")
            .field("config", &self.config)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

fn bind(bindings: &Bindings, device_id: DeviceId, session_id: SessionId) {
    let mut sessions = bindings.entry(device_id).or_default();
    if !sessions.contains(&session_id) {
        sessions.push(session_id);
    }
}

// ── Escalation ───────────────────────────────────────────────────────

/// Turns exhausted notifications into workflow overrides
#[derive(Clone)]
struct Escalator {
    orchestrator: Orchestrator,
    bindings: Bindings,
    config: EscalationConfig,
}

impl Escalator {
    /// Handles exhausted reports one at a time, in arrival order
    async fn run(self, mut exhausted: mpsc::Receiver<DispatchReport>) {
        while let Some(report) = exhausted.recv().await {
            self.escalate(&report).await;
        }
    }

    async fn escalate(&self, report: &DispatchReport) -> EscalationOutcome {
        error!(
            event_id = %report.event_id,
            device_id = %report.device_id,
            attempts = report.attempts.len(),
            "All notification attempts failed, escalating"
        );

        let data = json!({
            "reason": "notification_exhausted",
            "event_id": report.event_id,
            "device_id": report.device_id,
        });
        let mut outcome = EscalationOutcome::default();

        if self.config.override_bound_sessions {
            let bound = self
                .bindings
                .get(&report.device_id)
                .map(|s| s.value().clone())
                .unwrap_or_default();
            for session_id in bound {
                match self.orchestrator.get_session(&session_id).await {
                    Ok(session) if carries_emergency(&session) => {
                        debug!(session_id = %session_id, "Case already escalated");
                        outcome.already_escalated.push(session_id);
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Bound case unavailable");
                        continue;
                    }
                }
                match self.orchestrator.emergency_override(&session_id, data.clone()).await {
                    Ok(_) => outcome.overridden.push(session_id),
                    Err(SentinelError::OverrideConflict(_)) => {
                        debug!(session_id = %session_id, "Session already overridden");
                        outcome.already_escalated.push(session_id);
                    }
                    Err(e) => warn!(session_id = %session_id, error = %e, "Escalation override skipped"),
                }
            }
        }

        if outcome.overridden.is_empty()
            && outcome.already_escalated.is_empty()
            && self.config.start_device_emergency
        {
            match self
                .orchestrator
                .start_workflow(WorkflowKind::DeviceEmergency, data)
                .await
            {
                Ok(session_id) => {
                    info!(
                        session_id = %session_id,
                        device_id = %report.device_id,
                        "Device emergency workflow started"
                    );
                    bind(&self.bindings, report.device_id.clone(), session_id.clone());
                    outcome.started = Some(session_id);
                }
                Err(e) => error!(error = %e, "Could not start device emergency workflow"),
            }
        }
        outcome
    }
}

/// A bound case that is already the device's emergency response: an
/// overridden case or a device-emergency case, unless aborted
fn carries_emergency(session: &Session) -> bool {
    session.status != SessionStatus::Aborted
        && (session.emergency_override.is_some()
            || session.workflow_kind == WorkflowKind::DeviceEmergency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_telemetry::DispatchOutcome;
    use sentinel_types::FailureKind;
    use sentinel_workflow::{FnAdapter, StaticAdapter};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn registration() -> DeviceRegistration {
        DeviceRegistration::new("watch-1", "patient-1")
            .with_contact(EmergencyContact::new("Jane Doe", "spouse", "+1-555-0100").primary())
    }

    async fn sentinel() -> Sentinel {
        Sentinel::from_config(SentinelConfig::default()).await.unwrap()
    }

    fn exhausted(device: &str) -> DispatchReport {
        exhausted_for(device, "event-1")
    }

    fn exhausted_for(device: &str, event: &str) -> DispatchReport {
        DispatchReport {
            event_id: EventId::new(event),
            device_id: DeviceId::new(device),
            outcome: DispatchOutcome::Exhausted,
            stages_started: 1,
            attempts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_builtin_intake_completes() {
        let sentinel = sentinel().await;
        let id = sentinel
            .start_workflow(WorkflowKind::ScheduledIntake, json!({ "patient_name": "A" }))
            .await
            .unwrap();

        let session = sentinel.wait_until_settled(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.context.len(), 7);

        let health = sentinel.agent_health().await;
        assert_eq!(health.len(), 8);
        assert!(health.iter().all(|h| h.healthy));
    }

    #[tokio::test]
    async fn test_device_step_reads_bound_device() {
        let sentinel = sentinel().await;
        let device = sentinel.register_device(registration()).unwrap();
        sentinel
            .update_vital_signs(
                &device.device_id,
                HashMap::from([(VitalName::OxygenSaturation, 85.0)]),
            )
            .await
            .unwrap();

        let id = sentinel
            .start_workflow(WorkflowKind::DeviceScan, json!({ "device_id": "watch-1" }))
            .await
            .unwrap();
        let session = sentinel.wait_until_settled(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        let payload = &session.context[&sentinel_types::StepName::from("smart_health_device")].payload;
        assert_eq!(payload["emergency"], json!(true));
        assert_eq!(payload["emergency_contacts"][0]["name"], json!("Jane Doe"));

        let status = sentinel.device_status(&device.device_id).await.unwrap();
        assert_eq!(status.bound_sessions, vec![id]);
        assert_eq!(status.open_events.len(), 1);
    }

    #[tokio::test]
    async fn test_start_with_unknown_device_rejected() {
        let sentinel = sentinel().await;
        assert!(matches!(
            sentinel
                .start_workflow(WorkflowKind::DeviceScan, json!({ "device_id": "ghost" }))
                .await,
            Err(SentinelError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_workflow_archives_and_unbinds() {
        let sentinel = sentinel().await;
        sentinel.register_device(registration()).unwrap();
        let device = DeviceId::new("watch-1");
        let id = sentinel
            .start_workflow(WorkflowKind::DeviceScan, json!({ "device_id": "watch-1" }))
            .await
            .unwrap();
        sentinel.wait_until_settled(&id).await.unwrap();

        sentinel.complete_workflow(&id).await.unwrap();
        assert!(matches!(
            sentinel.session_status(&id).await,
            Err(SentinelError::SessionNotFound(_))
        ));
        assert!(sentinel
            .device_status(&device)
            .await
            .unwrap()
            .bound_sessions
            .is_empty());
    }

    /// Static adapters everywhere except `legal`, which fails fatally and
    /// counts its calls
    fn rejecting_legal(calls: Arc<AtomicU32>) -> AdapterRegistry {
        sentinel_types::StepName::VOCABULARY
            .iter()
            .filter(|s| **s != sentinel_types::StepName::LEGAL)
            .fold(AdapterRegistry::new(), |r, s| {
                r.with(*s, Arc::new(StaticAdapter::new(*s, json!({ "ok": true }))))
            })
            .with(
                "legal",
                Arc::new(
                    FnAdapter::new("legal-rejecting", move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(sentinel_workflow::StepFault::Fatal("records sealed".into()))
                    })
                    .with_policy(sentinel_types::FailurePolicy::Fatal),
                ),
            )
    }

    #[tokio::test]
    async fn test_escalation_overrides_bound_session() {
        let legal_calls = Arc::new(AtomicU32::new(0));
        let adapters = rejecting_legal(legal_calls.clone());
        let sentinel = Sentinel::builder().adapters(adapters).build().await.unwrap();
        sentinel.register_device(registration()).unwrap();

        let id = sentinel
            .start_workflow(WorkflowKind::EmergencyIntake, json!({ "device_id": "watch-1" }))
            .await
            .unwrap();
        let failed = sentinel.wait_until_settled(&id).await.unwrap();
        assert_eq!(failed.status, SessionStatus::StepFailed);
        assert!(matches!(
            failed.failure.as_ref().map(|f| &f.kind),
            Some(FailureKind::Fatal)
        ));

        let escalator = Escalator {
            orchestrator: sentinel.orchestrator.clone(),
            bindings: sentinel.bindings.clone(),
            config: EscalationConfig::default(),
        };
        let outcome = escalator.escalate(&exhausted("watch-1")).await;
        assert_eq!(outcome.overridden, vec![id.clone()]);
        assert!(outcome.started.is_none());

        let session = sentinel.wait_until_settled(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Overridden);
        assert_eq!(legal_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_escalation_starts_device_emergency() {
        let sentinel = sentinel().await;
        sentinel.register_device(registration()).unwrap();
        let escalator = Escalator {
            orchestrator: sentinel.orchestrator.clone(),
            bindings: sentinel.bindings.clone(),
            config: EscalationConfig::default(),
        };

        let outcome = escalator.escalate(&exhausted("watch-1")).await;
        let started = outcome.started.unwrap();
        let session = sentinel.wait_until_settled(&started).await.unwrap();
        assert_eq!(session.workflow_kind, WorkflowKind::DeviceEmergency);
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(
            sentinel
                .device_status(&DeviceId::new("watch-1"))
                .await
                .unwrap()
                .bound_sessions,
            vec![started]
        );
    }

    #[tokio::test]
    async fn test_repeated_exhaustion_starts_one_device_emergency() {
        let sentinel = sentinel().await;
        sentinel.register_device(registration()).unwrap();
        let escalator = Escalator {
            orchestrator: sentinel.orchestrator.clone(),
            bindings: sentinel.bindings.clone(),
            config: EscalationConfig::default(),
        };

        let first = escalator.escalate(&exhausted_for("watch-1", "event-1")).await;
        let started = first.started.unwrap();

        // Several vitals of one sample exhausting back to back
        let second = escalator.escalate(&exhausted_for("watch-1", "event-2")).await;
        assert!(second.started.is_none());
        assert!(second.overridden.is_empty());
        assert_eq!(second.already_escalated, vec![started.clone()]);

        // Still the patient's case after it settles, until completed
        sentinel.wait_until_settled(&started).await.unwrap();
        let third = escalator.escalate(&exhausted_for("watch-1", "event-3")).await;
        assert!(third.started.is_none());
        assert_eq!(third.already_escalated, vec![started.clone()]);

        let emergencies = sentinel
            .orchestrator
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.workflow_kind == WorkflowKind::DeviceEmergency)
            .count();
        assert_eq!(emergencies, 1);

        sentinel.complete_workflow(&started).await.unwrap();
        let fresh = escalator.escalate(&exhausted_for("watch-1", "event-4")).await;
        assert!(fresh.started.is_some());
    }

    #[tokio::test]
    async fn test_overridden_case_counts_as_escalated() {
        let adapters = rejecting_legal(Arc::new(AtomicU32::new(0)));
        let sentinel = Sentinel::builder().adapters(adapters).build().await.unwrap();
        sentinel.register_device(registration()).unwrap();
        let id = sentinel
            .start_workflow(WorkflowKind::EmergencyIntake, json!({ "device_id": "watch-1" }))
            .await
            .unwrap();
        sentinel.wait_until_settled(&id).await.unwrap();

        let escalator = Escalator {
            orchestrator: sentinel.orchestrator.clone(),
            bindings: sentinel.bindings.clone(),
            config: EscalationConfig::default(),
        };
        let first = escalator.escalate(&exhausted_for("watch-1", "event-1")).await;
        assert_eq!(first.overridden, vec![id.clone()]);

        let second = escalator.escalate(&exhausted_for("watch-1", "event-2")).await;
        assert!(second.overridden.is_empty());
        assert_eq!(second.already_escalated, vec![id.clone()]);
        assert!(second.started.is_none());
        assert_eq!(sentinel.orchestrator.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_escalation_disabled() {
        let sentinel = sentinel().await;
        let escalator = Escalator {
            orchestrator: sentinel.orchestrator.clone(),
            bindings: sentinel.bindings.clone(),
            config: EscalationConfig {
                override_bound_sessions: false,
                start_device_emergency: false,
            },
        };
        assert_eq!(
            escalator.escalate(&exhausted("watch-1")).await,
            EscalationOutcome::default()
        );
        assert!(sentinel.orchestrator.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_audit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let config = SentinelConfig {
            audit: AuditConfig::File { path: path.clone() },
            ..Default::default()
        };
        let sentinel = Sentinel::from_config(config).await.unwrap();
        let id = sentinel
            .start_workflow(WorkflowKind::DeviceScan, json!({}))
            .await
            .unwrap();
        sentinel.wait_until_settled(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sentinel.shutdown().await;

        let sink = FileAuditSink::open(&path).await.unwrap();
        let entries = sink.read_all().await.unwrap();
        assert!(!entries.is_empty());
        assert!(sentinel_audit::IntegrityVerifier::verify_chain(&entries).valid);
    }
}
