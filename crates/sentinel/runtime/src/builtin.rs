//! Built-in step adapters for development and demos.
//!
//! Every step except `smart_health_device` answers with a fixed
//! placeholder payload. The device step reads the bound device from the
//! telemetry monitor.

use async_trait::async_trait;
use sentinel_telemetry::TelemetryMonitor;
use sentinel_types::{DeviceId, SentinelError, StepName, StepResult};
use sentinel_workflow::{AdapterRegistry, StaticAdapter, StepAdapter, StepContext, StepFault};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

/// Placeholder adapters for every step, plus the device step
pub fn builtin_adapters(monitor: TelemetryMonitor) -> AdapterRegistry {
    let placeholders = [
        (
            StepName::TRIAGE,
            json!({ "triage_status": "assessed", "priority": "standard" }),
        ),
        (
            StepName::ADMISSION,
            json!({
                "admission_status": "admitted",
                "ward_assigned": "general",
                "verification_status": { "id_verified": false, "insurance_verified": false }
            }),
        ),
        (
            StepName::LEGAL,
            json!({
                "legal_case": false,
                "police_notified": false,
                "evidence_preserved": true,
                "legal_status": "no_legal_implications"
            }),
        ),
        (
            StepName::MEDICAL_RECORDS,
            json!({
                "medical_history_retrieved": true,
                "allergies_identified": [],
                "medications_reconciled": true,
                "medical_records_status": "complete"
            }),
        ),
        (
            StepName::BILLING,
            json!({ "billing_status": "estimated" }),
        ),
        (
            StepName::COMMUNICATION,
            json!({
                "family_notified": true,
                "staff_alerts_sent": true,
                "communication_status": "completed"
            }),
        ),
        (
            StepName::SCHEDULING,
            json!({
                "appointments_scheduled": [],
                "follow_ups_created": [],
                "scheduling_status": "completed"
            }),
        ),
    ];

    placeholders
        .into_iter()
        .fold(AdapterRegistry::new(), |registry, (step, payload)| {
            registry.with(step, Arc::new(StaticAdapter::new(step, payload)))
        })
        .with(
            StepName::SMART_HEALTH_DEVICE,
            Arc::new(DeviceStepAdapter::new(monitor)),
        )
}

/// Reports the state of the device named by the case's `device_id`.
///
/// A case without a device succeeds with `device_bound: false`. An unknown
/// device is a fatal fault.
pub struct DeviceStepAdapter {
    monitor: TelemetryMonitor,
}

impl DeviceStepAdapter {
    pub fn new(monitor: TelemetryMonitor) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl StepAdapter for DeviceStepAdapter {
    fn name(&self) -> &str {
        "smart-health-device"
    }

    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn execute(&self, ctx: &StepContext) -> Result<StepResult, StepFault> {
        let Some(device_id) = ctx.input.get("device_id").and_then(|v| v.as_str()) else {
            return Ok(StepResult::success(
                ctx.step.clone(),
                json!({ "device_bound": false }),
            ));
        };
        let device_id = DeviceId::new(device_id);

        let assessment = self
            .monitor
            .check_emergency_conditions(&device_id)
            .await
            .map_err(|e| match e {
                SentinelError::DeviceNotFound(_) => StepFault::Fatal(e.to_string()),
                other => StepFault::Transport(other.to_string()),
            })?;
        let contacts = self
            .monitor
            .registry()
            .get_contacts(&device_id)
            .map_err(|e| StepFault::Fatal(e.to_string()))?;

        Ok(StepResult::success(
            ctx.step.clone(),
            json!({
                "device_bound": true,
                "device_id": device_id,
                "patient_id": assessment.patient_id,
                "emergency": assessment.is_emergency(),
                "conditions": assessment.conditions(),
                "open_events": assessment.open_events.len(),
                "emergency_contacts": contacts,
            }),
        ))
    }
}
