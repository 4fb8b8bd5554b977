//! Vital-sign samples, emergency events and notification attempts

use crate::{Channel, DeviceId, EmergencyContact, EventId, PatientId, ThresholdBreach, VitalName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One reading set from a device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VitalSample {
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub readings: HashMap<VitalName, f64>,
}

impl VitalSample {
    pub fn new(device_id: impl Into<DeviceId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            readings: HashMap::new(),
        }
    }

    pub fn with(mut self, vital: VitalName, value: f64) -> Self {
        self.readings.insert(vital, value);
        self
    }
}

/// Acknowledgement state of an emergency event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckState {
    Open,
    Acknowledged,
    Closed,
}

/// One breach episode for a (device, vital) pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencyEvent {
    pub id: EventId,
    pub device_id: DeviceId,
    pub patient_id: PatientId,
    pub triggering_vital: VitalName,
    /// Most recent breaching value
    pub value: f64,
    pub threshold_breached: ThresholdBreach,
    pub opened_at: DateTime<Utc>,
    /// Timestamp of the most recent breaching sample
    pub raised_at: DateTime<Utc>,
    pub ack_state: AckState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl EmergencyEvent {
    pub fn open(
        device_id: DeviceId,
        patient_id: PatientId,
        vital: VitalName,
        value: f64,
        breach: ThresholdBreach,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::generate(),
            device_id,
            patient_id,
            triggering_vital: vital,
            value,
            threshold_breached: breach,
            opened_at: at,
            raised_at: at,
            ack_state: AckState::Open,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ack_state != AckState::Closed
    }

    /// One-line description used in alert messages
    pub fn describe(&self) -> String {
        format!(
            "{} {} ({})",
            self.triggering_vital, self.value, self.threshold_breached
        )
    }
}

/// Delivery status of a notification attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    /// Accepted by the channel, delivery not confirmed
    Sent,
    Delivered,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Queued => write!(f, "queued"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One status record for delivering an event to a contact over a channel.
///
/// Records are append-only: a status change is a new record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub event_id: EventId,
    pub contact: EmergencyContact,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub attempted_at: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
