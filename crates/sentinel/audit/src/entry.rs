//! Audit entry types

use chrono::{DateTime, Utc};
use sentinel_types::{
    Channel, DeliveryStatus, DeviceId, EventId, NotificationAttempt, Session, SessionId,
    SessionStatus, StepName, WorkflowKind,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// What an audit entry records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    /// A persisted change of a session's orchestration state
    SessionTransition {
        session_id: SessionId,
        workflow_kind: WorkflowKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prior_status: Option<SessionStatus>,
        new_status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<StepName>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// A status record for one notification channel attempt
    NotificationAttempt {
        event_id: EventId,
        device_id: DeviceId,
        contact: String,
        channel: Channel,
        status: DeliveryStatus,
        retry_count: u32,
    },
}

impl AuditRecord {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            AuditRecord::SessionTransition { session_id, .. } => Some(session_id),
            AuditRecord::NotificationAttempt { .. } => None,
        }
    }

    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            AuditRecord::NotificationAttempt { event_id, .. } => Some(event_id),
            AuditRecord::SessionTransition { .. } => None,
        }
    }
}

/// An audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: Uuid,

    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,

    /// Component that produced the entry
    pub actor: String,

    /// What happened
    pub record: AuditRecord,

    /// Additional context/details
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,

    /// Hash of the previous entry (for chain integrity)
    pub previous_hash: Option<String>,

    /// Hash of this entry
    pub entry_hash: String,
}

/// Partial audit entry (before hashing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialAuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub record: AuditRecord,
    pub context: HashMap<String, serde_json::Value>,
}

impl PartialAuditEntry {
    /// Entry for a session moving from `prior` to its current status
    pub fn session_transition(
        actor: impl Into<String>,
        prior: Option<SessionStatus>,
        session: &Session,
        step: Option<StepName>,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            record: AuditRecord::SessionTransition {
                session_id: session.id.clone(),
                workflow_kind: session.workflow_kind,
                prior_status: prior,
                new_status: session.status,
                step,
                detail,
            },
            context: HashMap::from([(
                "cursor".to_string(),
                serde_json::Value::from(session.cursor),
            )]),
        }
    }

    /// Entry for one notification attempt record
    pub fn notification_attempt(
        actor: impl Into<String>,
        device_id: &DeviceId,
        attempt: &NotificationAttempt,
    ) -> Self {
        let mut context = HashMap::new();
        if let Some(detail) = &attempt.detail {
            context.insert("detail".to_string(), serde_json::Value::from(detail.clone()));
        }
        Self {
            id: Uuid::new_v4(),
            timestamp: attempt.attempted_at,
            actor: actor.into(),
            record: AuditRecord::NotificationAttempt {
                event_id: attempt.event_id.clone(),
                device_id: device_id.clone(),
                contact: attempt.contact.name.clone(),
                channel: attempt.channel,
                status: attempt.status,
                retry_count: attempt.retry_count,
            },
            context,
        }
    }

    /// Convert to full entry with hashes
    pub fn finalize(self, previous_hash: Option<String>) -> AuditEntry {
        let entry_hash = compute_hash(
            &self.id,
            &self.timestamp,
            &self.actor,
            &self.record,
            &self.context,
            previous_hash.as_deref(),
        );

        AuditEntry {
            id: self.id,
            timestamp: self.timestamp,
            actor: self.actor,
            record: self.record,
            context: self.context,
            previous_hash,
            entry_hash,
        }
    }
}

pub(crate) fn compute_hash(
    id: &Uuid,
    timestamp: &DateTime<Utc>,
    actor: &str,
    record: &AuditRecord,
    context: &HashMap<String, serde_json::Value>,
    previous_hash: Option<&str>,
) -> String {
    // Key order must not depend on the map's iteration order
    let context: BTreeMap<&String, &serde_json::Value> = context.iter().collect();
    let hash_input = format!(
        "{}{}{}{}{}{}",
        id,
        timestamp.to_rfc3339(),
        actor,
        serde_json::to_string(record).unwrap_or_default(),
        serde_json::to_string(&context).unwrap_or_default(),
        previous_hash.unwrap_or("")
    );

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    hex::encode(hasher.finalize())
}

/// A `pending -> running` transition entry for a one-step session
#[cfg(test)]
pub(crate) fn sample_transition(session_id: &str) -> PartialAuditEntry {
    let definition = sentinel_types::WorkflowDefinition::new(
        WorkflowKind::DeviceScan,
        vec![StepName::from("smart_health_device")],
    )
    .expect("one-step definition");
    let mut session = Session::new(&definition, serde_json::json!({}));
    session.id = SessionId::new(session_id);
    session.status = SessionStatus::Running;
    PartialAuditEntry::session_transition(
        "orchestrator",
        Some(SessionStatus::Pending),
        &session,
        None,
        None,
    )
}
