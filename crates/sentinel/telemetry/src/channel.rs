//! Notification channels
//!
//! A [`ChannelSender`] hands an alert to an external transport (SMS
//! gateway, mail relay, push service, voice line). Rendering and transport
//! details stay behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_types::{Channel, DeviceId, EmergencyContact, EmergencyEvent, EventId, PatientId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// What the transport reported for a send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Accepted, delivery not yet confirmed
    Sent,
    Delivered,
}

/// Transport-level send failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("recipient rejected: {0}")]
    Rejected(String),

    #[error("contact has no {0} address")]
    NoAddress(Channel),

    #[error("no sender configured for {0}")]
    NotConfigured(Channel),
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_))
    }
}

/// Alert content handed to senders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub event_id: EventId,
    pub device_id: DeviceId,
    pub patient_id: PatientId,
    pub subject: String,
    pub body: String,
    pub raised_at: DateTime<Utc>,
}

impl AlertMessage {
    pub fn for_event(event: &EmergencyEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            device_id: event.device_id.clone(),
            patient_id: event.patient_id.clone(),
            subject: "Smart Health Device Alert - emergency".to_string(),
            body: format!(
                "EMERGENCY: Patient {} has critical vital signs: {}",
                event.patient_id,
                event.describe()
            ),
            raised_at: event.raised_at,
        }
    }
}

/// Outbound transport for one channel
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        contact: &EmergencyContact,
        message: &AlertMessage,
    ) -> Result<Delivery, ChannelError>;
}

/// Sender that writes the alert to the log and reports it delivered.
///
/// Development default for every channel.
#[derive(Debug, Clone)]
pub struct LogChannel {
    channel: Channel,
}

impl LogChannel {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LogChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        contact: &EmergencyContact,
        message: &AlertMessage,
    ) -> Result<Delivery, ChannelError> {
        let address = match self.channel {
            Channel::Email => contact
                .email
                .clone()
                .ok_or(ChannelError::NoAddress(Channel::Email))?,
            Channel::Sms | Channel::Call | Channel::Push => contact.phone.clone(),
        };

        tracing::info!(
            channel = %self.channel,
            to = %address,
            event_id = %message.event_id,
            subject = %message.subject,
            "{}",
            message.body
        );
        Ok(Delivery::Delivered)
    }
}

/// Channel → sender bindings
#[derive(Clone, Default)]
pub struct ChannelSet {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`LogChannel`] for every channel
    pub fn logging() -> Self {
        [Channel::Sms, Channel::Email, Channel::Push, Channel::Call]
            .into_iter()
            .fold(Self::new(), |set, ch| set.with(Arc::new(LogChannel::new(ch))))
    }

    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }
}

impl std::fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<Channel> = self.senders.keys().copied().collect();
        channels.sort();
        f.debug_struct("ChannelSet").field("channels", &channels).finish()
    }
}
