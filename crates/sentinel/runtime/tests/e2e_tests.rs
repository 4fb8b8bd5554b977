//! End-to-end tests: cases and device telemetry through the service facade.

use async_trait::async_trait;
use sentinel_audit::{AuditTrail, IntegrityVerifier};
use sentinel_runtime::{Sentinel, SentinelConfig};
use sentinel_telemetry::{
    AlertMessage, ChannelError, ChannelSender, ChannelSet, Delivery, DispatchOutcome,
    TelemetryEvent,
};
use sentinel_types::{
    Channel, DeviceId, DeviceRegistration, EmergencyContact, FailurePolicy, RetryPolicy,
    SentinelError, SessionId, SessionOutcome, SessionStatus, StepName, VitalName, VitalSample,
    WorkflowKind,
};
use sentinel_workflow::{AdapterRegistry, FnAdapter, StaticAdapter, StepFault};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Channel whose gateway is always down
struct DownChannel(Channel);

#[async_trait]
impl ChannelSender for DownChannel {
    fn channel(&self) -> Channel {
        self.0
    }

    async fn send(
        &self,
        _contact: &EmergencyContact,
        _message: &AlertMessage,
    ) -> Result<Delivery, ChannelError> {
        Err(ChannelError::Unavailable("gateway down".into()))
    }
}

fn fast_config() -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.dispatch.retry = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5));
    config.dispatch.contact_wait_ms = 50;
    config.orchestrator.retry =
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5));
    config
}

/// Static adapters everywhere except a `legal` step that always rejects
fn adapters_with_fatal_legal() -> AdapterRegistry {
    StepName::VOCABULARY
        .iter()
        .filter(|s| **s != StepName::LEGAL)
        .fold(AdapterRegistry::new(), |registry, step| {
            registry.with(
                *step,
                Arc::new(StaticAdapter::new(*step, json!({ "status": "ok" }))),
            )
        })
        .with(
            StepName::LEGAL,
            Arc::new(
                FnAdapter::new("legal-rejecting", |_| {
                    Err(StepFault::Fatal("case requires manual legal review".into()))
                })
                .with_policy(FailurePolicy::Fatal),
            ),
        )
}

fn watch() -> DeviceRegistration {
    DeviceRegistration::new("watch-1", "patient-1")
        .with_model("Apple Watch Series 9")
        .with_contact(EmergencyContact::new("Jane Doe", "spouse", "+1-555-0100").primary())
}

fn steps(names: &[&str]) -> Vec<StepName> {
    names.iter().map(|s| StepName::from(*s)).collect()
}

async fn wait_for_status(sentinel: &Sentinel, id: &SessionId, status: SessionStatus) {
    let poll = async {
        loop {
            if sentinel.session_status(id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .unwrap_or_else(|_| panic!("session never reached {}", status));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn emergency_intake_stops_at_fatal_legal_step() {
    let (audit, sink) = AuditTrail::in_memory();
    let sentinel = Sentinel::builder()
        .config(fast_config())
        .adapters(adapters_with_fatal_legal())
        .audit(audit)
        .build()
        .await
        .unwrap();

    let id = sentinel
        .start_workflow(WorkflowKind::EmergencyIntake, json!({ "patient_name": "A" }))
        .await
        .unwrap();
    let session = sentinel.wait_until_settled(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::StepFailed);
    assert_eq!(session.cursor, 2);
    assert_eq!(session.context.len(), 2);
    assert!(!session.has_result(&StepName::from("legal")));
    assert!(matches!(
        session.failure.as_ref().map(|f| f.to_error()),
        Some(SentinelError::StepFatalFailure { .. })
    ));

    let view = sentinel.session_status(&id).await.unwrap();
    assert_eq!(
        view.outcome,
        SessionOutcome::Failed {
            step: StepName::from("legal"),
            reason: "case requires manual legal review".into(),
        }
    );

    let entries = sink.entries_for_session(&id);
    // created, started, triage, admission, step_failed
    assert_eq!(entries.len(), 5);
    assert!(IntegrityVerifier::verify_chain(&sink.entries()).valid);
}

#[tokio::test]
async fn override_recovers_failed_intake() {
    let sentinel = Sentinel::builder()
        .config(fast_config())
        .adapters(adapters_with_fatal_legal())
        .build()
        .await
        .unwrap();

    let id = sentinel
        .start_workflow(WorkflowKind::EmergencyIntake, json!({}))
        .await
        .unwrap();
    sentinel.wait_until_settled(&id).await.unwrap();

    let data = json!({ "reason": "critical vitals", "ordered_by": "dr-house" });
    let overridden = sentinel.emergency_override(&id, data.clone()).await.unwrap();
    assert_eq!(
        overridden.steps,
        steps(&["triage", "admission", "smart_health_device", "communication"])
    );
    assert_eq!(overridden.input["ordered_by"], json!("dr-house"));

    wait_for_status(&sentinel, &id, SessionStatus::Overridden).await;

    // Same payload again is a no-op, a different one conflicts
    let again = sentinel.emergency_override(&id, data).await.unwrap();
    assert_eq!(again.status, SessionStatus::Overridden);
    assert!(matches!(
        sentinel.emergency_override(&id, json!({ "reason": "other" })).await,
        Err(SentinelError::OverrideConflict(_))
    ));

    let archived = sentinel.complete_workflow(&id).await.unwrap();
    assert_eq!(archived.context.len(), 4);
}

#[tokio::test]
async fn breach_notifies_primary_once() {
    let sentinel = Sentinel::builder()
        .config(fast_config())
        .build()
        .await
        .unwrap();
    sentinel.register_device(watch()).unwrap();
    let device = DeviceId::new("watch-1");
    let mut bus = sentinel.subscribe_telemetry();

    let t0 = chrono::Utc::now();
    for (i, hr) in [130.0, 135.0, 80.0].into_iter().enumerate() {
        sentinel
            .ingest(
                VitalSample::new("watch-1", t0 + chrono::Duration::seconds(i as i64))
                    .with(VitalName::HeartRate, hr),
            )
            .await
            .unwrap();
    }

    let (mut opened, mut updated, mut closed, mut dispatched) = (0, 0, 0, 0);
    let collect = async {
        while dispatched == 0 || closed == 0 {
            match bus.recv().await.unwrap() {
                TelemetryEvent::Opened(_) => opened += 1,
                TelemetryEvent::Updated(_) => updated += 1,
                TelemetryEvent::Closed(_) => closed += 1,
                TelemetryEvent::Dispatched(report) => {
                    assert!(report.is_notified());
                    dispatched += 1;
                }
                TelemetryEvent::Acknowledged(_) => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .unwrap();
    assert_eq!((opened, updated, closed, dispatched), (1, 1, 1, 1));

    let status = sentinel.device_status(&device).await.unwrap();
    assert!(status.open_events.is_empty());
    assert_eq!(status.recent_events.len(), 1);

    // Delivered alerts never escalate
    assert!(sentinel.orchestrator().list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_notification_overrides_bound_session() {
    let sentinel = Sentinel::builder()
        .config(fast_config())
        .adapters(adapters_with_fatal_legal())
        .channels(ChannelSet::new().with(Arc::new(DownChannel(Channel::Sms))))
        .build()
        .await
        .unwrap();
    sentinel.register_device(watch()).unwrap();

    let id = sentinel
        .start_workflow(WorkflowKind::EmergencyIntake, json!({ "device_id": "watch-1" }))
        .await
        .unwrap();
    let failed = sentinel.wait_until_settled(&id).await.unwrap();
    assert_eq!(failed.status, SessionStatus::StepFailed);

    sentinel
        .update_vital_signs(
            &DeviceId::new("watch-1"),
            HashMap::from([(VitalName::OxygenSaturation, 82.0)]),
        )
        .await
        .unwrap();

    wait_for_status(&sentinel, &id, SessionStatus::Overridden).await;
    let session = sentinel.orchestrator().get_session(&id).await.unwrap();
    let applied = session.emergency_override.unwrap();
    assert_eq!(applied.payload["reason"], json!("notification_exhausted"));
    assert_eq!(applied.payload["device_id"], json!("watch-1"));
}

#[tokio::test]
async fn exhausted_notification_without_case_starts_device_emergency() {
    let (audit, sink) = AuditTrail::in_memory();
    let sentinel = Sentinel::builder()
        .config(fast_config())
        .channels(ChannelSet::new().with(Arc::new(DownChannel(Channel::Sms))))
        .audit(audit)
        .build()
        .await
        .unwrap();
    sentinel
        .register_device(
            watch().with_contact(EmergencyContact::new("John Doe", "brother", "+1-555-0101")),
        )
        .unwrap();
    let mut bus = sentinel.subscribe_telemetry();

    let report = sentinel
        .update_vital_signs(
            &DeviceId::new("watch-1"),
            HashMap::from([(VitalName::Temperature, 104.5)]),
        )
        .await
        .unwrap();
    let event_id = report.opened[0].id.clone();

    let dispatch = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let TelemetryEvent::Dispatched(report) = bus.recv().await.unwrap() {
                return report;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(dispatch.outcome, DispatchOutcome::Exhausted);
    assert_eq!(dispatch.stages_started, 2);

    let started = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let sessions = sentinel.orchestrator().list_sessions().await.unwrap();
            if let Some(view) = sessions.into_iter().next() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(started.workflow_kind, WorkflowKind::DeviceEmergency);

    let session = sentinel.wait_until_settled(&started.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(
        session.steps,
        steps(&["smart_health_device", "triage", "communication", "admission"])
    );

    // Every attempt of both contacts is on the audit trail
    assert!(!sink.entries_for_event(&event_id).is_empty());
    assert!(IntegrityVerifier::verify_chain(&sink.entries()).valid);
}

#[tokio::test]
async fn multi_vital_exhaustion_starts_one_device_emergency() {
    let sentinel = Sentinel::builder()
        .config(fast_config())
        .channels(ChannelSet::new().with(Arc::new(DownChannel(Channel::Sms))))
        .build()
        .await
        .unwrap();
    sentinel.register_device(watch()).unwrap();
    let mut bus = sentinel.subscribe_telemetry();

    let report = sentinel
        .update_vital_signs(
            &DeviceId::new("watch-1"),
            HashMap::from([
                (VitalName::HeartRate, 190.0),
                (VitalName::BloodPressureSystolic, 210.0),
                (VitalName::BloodPressureDiastolic, 125.0),
                (VitalName::Temperature, 105.0),
                (VitalName::OxygenSaturation, 75.0),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(report.opened.len(), 5);

    let mut exhausted = 0;
    tokio::time::timeout(Duration::from_secs(5), async {
        while exhausted < 5 {
            if let TelemetryEvent::Dispatched(report) = bus.recv().await.unwrap() {
                assert_eq!(report.outcome, DispatchOutcome::Exhausted);
                exhausted += 1;
            }
        }
    })
    .await
    .unwrap();

    // Give the escalator time to work through all five reports
    tokio::time::sleep(Duration::from_millis(200)).await;
    let emergencies: Vec<_> = sentinel
        .orchestrator()
        .list_sessions()
        .await
        .unwrap()
        .into_iter()
        .filter(|v| v.workflow_kind == WorkflowKind::DeviceEmergency)
        .collect();
    assert_eq!(emergencies.len(), 1);

    let status = sentinel.device_status(&DeviceId::new("watch-1")).await.unwrap();
    assert_eq!(status.bound_sessions, vec![emergencies[0].session_id.clone()]);
}

#[tokio::test]
async fn abort_stops_running_case() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let adapters = StepName::VOCABULARY
        .iter()
        .fold(AdapterRegistry::new(), |registry, step| {
            registry.with(*step, Arc::new(StaticAdapter::new(*step, json!({}))))
        })
        .with(StepName::TRIAGE, Arc::new(GatedTriage(gate.clone())));
    let sentinel = Sentinel::builder()
        .config(fast_config())
        .adapters(adapters)
        .build()
        .await
        .unwrap();

    let id = sentinel
        .start_workflow(WorkflowKind::EmergencyIntake, json!({}))
        .await
        .unwrap();
    let aborted = sentinel.abort_workflow(&id, "patient transferred").await.unwrap();
    assert_eq!(aborted.status, SessionStatus::Aborted);

    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let session = sentinel.orchestrator().get_session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Aborted);
    assert!(session.context.is_empty());
    assert_eq!(
        sentinel.session_status(&id).await.unwrap().outcome,
        SessionOutcome::Aborted {
            reason: "patient transferred".into()
        }
    );
}

/// Triage that waits for a permit before answering
struct GatedTriage(Arc<tokio::sync::Semaphore>);

#[async_trait]
impl sentinel_workflow::StepAdapter for GatedTriage {
    fn name(&self) -> &str {
        "triage-gated"
    }

    async fn execute(
        &self,
        ctx: &sentinel_workflow::StepContext,
    ) -> Result<sentinel_types::StepResult, StepFault> {
        let _permit = self
            .0
            .acquire()
            .await
            .map_err(|e| StepFault::Transport(e.to_string()))?;
        Ok(sentinel_types::StepResult::success(ctx.step.clone(), json!({})))
    }
}

#[tokio::test]
async fn vitals_feed_streams_until_cancelled() {
    let sentinel = Sentinel::builder()
        .config(fast_config())
        .build()
        .await
        .unwrap();
    sentinel.register_device(watch()).unwrap();
    let device = DeviceId::new("watch-1");

    sentinel
        .update_vital_signs(&device, HashMap::from([(VitalName::HeartRate, 72.0)]))
        .await
        .unwrap();

    let mut feed = sentinel
        .subscribe_vitals(&device, Duration::from_millis(10))
        .unwrap();
    let first = feed.recv().await.unwrap();
    assert_eq!(first.latest[&VitalName::HeartRate], 72.0);
    assert!(feed.recv().await.is_some());
    feed.cancel().await;

    assert!(matches!(
        sentinel.subscribe_vitals(&DeviceId::new("ghost"), Duration::from_secs(1)),
        Err(SentinelError::DeviceNotFound(_))
    ));
}

#[tokio::test]
async fn contacts_and_assessment_through_facade() {
    let sentinel = Sentinel::from_config(SentinelConfig::default()).await.unwrap();
    sentinel.register_device(watch()).unwrap();
    let device = DeviceId::new("watch-1");

    assert!(matches!(
        sentinel.add_emergency_contact(
            &device,
            EmergencyContact::new("John Doe", "brother", "+1-555-0101").primary(),
        ),
        Err(SentinelError::PrimaryConflict(_))
    ));
    sentinel
        .add_emergency_contact(
            &device,
            EmergencyContact::new("John Doe", "brother", "+1-555-0101")
                .with_channel(Channel::Call),
        )
        .unwrap();
    let contacts = sentinel.get_emergency_contacts(&device).unwrap();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[1].channels(), vec![Channel::Call]);

    sentinel
        .update_vital_signs(
            &device,
            HashMap::from([
                (VitalName::BloodPressureSystolic, 150.0),
                (VitalName::HeartRate, 70.0),
            ]),
        )
        .await
        .unwrap();
    let assessment = sentinel.check_emergency_conditions(&device).await.unwrap();
    assert!(assessment.is_emergency());
    assert_eq!(
        assessment.conditions(),
        vec!["blood_pressure_systolic 150 (above max 140)".to_string()]
    );
    assert_eq!(sentinel.list_devices().len(), 1);

    let event_id = assessment.open_events[0].id.clone();
    let acked = sentinel.acknowledge_event(&event_id).await.unwrap();
    assert!(acked.is_open());

    sentinel.shutdown().await;
}
