//! Notification dispatcher: fans an emergency event out to the device's
//! contacts.
//!
//! The primary contact is tried first on all of its channels at once. If
//! nothing is delivered within the contact wait window, the remaining
//! contacts are tried one at a time in registration order. The first
//! delivery settles the dispatch; channel attempts still in flight keep
//! running and keep recording their status.

use crate::channel::{AlertMessage, ChannelError, ChannelSet, Delivery};
use crate::config::DispatchConfig;
use crate::registry::DeviceRegistry;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use sentinel_audit::{AuditTrail, PartialAuditEntry};
use sentinel_types::{
    Channel, DeliveryStatus, DeviceId, EmergencyContact, EmergencyEvent, EventId,
    NotificationAttempt, SentinelError, SentinelResult,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const ACTOR: &str = "dispatcher";

/// How a dispatch ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// One attempt reached `delivered`
    Notified { contact: String, channel: Channel },
    /// Every attempt of every stage failed or ended without delivery
    Exhausted,
}

/// Result of notifying contacts about one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub event_id: EventId,
    pub device_id: DeviceId,
    pub outcome: DispatchOutcome,
    pub stages_started: usize,
    /// Attempt log as of the moment the outcome was decided
    pub attempts: Vec<NotificationAttempt>,
}

impl DispatchReport {
    pub fn is_notified(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Notified { .. })
    }

    /// `NotificationExhausted` for an exhausted dispatch
    pub fn into_result(self) -> SentinelResult<Self> {
        match self.outcome {
            DispatchOutcome::Notified { .. } => Ok(self),
            DispatchOutcome::Exhausted => Err(SentinelError::NotificationExhausted(self.event_id)),
        }
    }
}

/// Append-only attempt records for one event
#[derive(Debug)]
struct AttemptLog {
    device_id: DeviceId,
    attempts: Vec<NotificationAttempt>,
}

struct DispatchInner {
    registry: Arc<DeviceRegistry>,
    channels: ChannelSet,
    audit: AuditTrail,
    config: DispatchConfig,
    logs: DashMap<EventId, AttemptLog>,
    /// Logged events, oldest first
    log_order: Mutex<VecDeque<EventId>>,
    /// Delivery confirmations for dispatches still deciding
    waiters: DashMap<EventId, mpsc::UnboundedSender<(String, Channel)>>,
    permits: Arc<Semaphore>,
}

/// Fans emergency events out to contacts over their preferred channels
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<DispatchInner>,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        channels: ChannelSet,
        audit: AuditTrail,
        config: DispatchConfig,
    ) -> SentinelResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(DispatchInner {
                registry,
                channels,
                audit,
                permits: Arc::new(Semaphore::new(config.max_parallel)),
                config,
                logs: DashMap::new(),
                log_order: Mutex::new(VecDeque::new()),
                waiters: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Notify the event's contacts and report the outcome
    #[instrument(skip_all, fields(event_id = %event.id, device_id = %event.device_id))]
    pub async fn notify(&self, event: &EmergencyEvent) -> SentinelResult<DispatchReport> {
        let contacts = self.inner.registry.get_contacts(&event.device_id)?;
        let stages = plan_stages(contacts);
        let message = AlertMessage::for_event(event);
        let wait = self.inner.config.contact_wait();

        self.inner.open_log(event);
        let (confirm_tx, mut confirmations) = mpsc::unbounded_channel();
        self.inner.waiters.insert(event.id.clone(), confirm_tx);

        let mut tasks: JoinSet<(DeliveryStatus, String, Channel)> = JoinSet::new();
        let mut unconfirmed = 0usize;
        let mut delivered: Option<(String, Channel)> = None;
        let mut stages_started = 0;

        if stages.is_empty() {
            warn!("Device has no emergency contacts");
        }

        'stages: for stage in &stages {
            stages_started += 1;
            for contact in stage {
                for channel in contact.channels() {
                    tasks.spawn(deliver(
                        self.inner.clone(),
                        event.id.clone(),
                        event.device_id.clone(),
                        contact.clone(),
                        channel,
                        message.clone(),
                    ));
                }
            }
            info!(
                stage = stages_started,
                contacts = ?stage.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "Notification stage started"
            );

            let deadline = Instant::now() + wait;
            loop {
                if tasks.is_empty() && unconfirmed == 0 {
                    // Everything so far failed outright; no point waiting
                    break;
                }
                tokio::select! {
                    Some(joined) = tasks.join_next() => {
                        match joined {
                            Ok((status, contact, channel)) => match status {
                                DeliveryStatus::Delivered => {
                                    delivered = Some((contact, channel));
                                    break 'stages;
                                }
                                DeliveryStatus::Sent => unconfirmed += 1,
                                DeliveryStatus::Failed | DeliveryStatus::Queued => {}
                            },
                            Err(e) => warn!(error = %e, "Channel task did not finish"),
                        }
                    }
                    Some(confirmed) = confirmations.recv() => {
                        delivered = Some(confirmed);
                        break 'stages;
                    }
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }
        }

        // Every stage has started; let outstanding attempts conclude
        while delivered.is_none() && !tasks.is_empty() {
            tokio::select! {
                Some(joined) = tasks.join_next() => {
                    if let Ok((DeliveryStatus::Delivered, contact, channel)) = joined {
                        delivered = Some((contact, channel));
                    }
                }
                Some(confirmed) = confirmations.recv() => delivered = Some(confirmed),
            }
        }

        self.inner.waiters.remove(&event.id);
        tasks.detach_all();

        let outcome = match delivered {
            Some((contact, channel)) => {
                info!(contact = %contact, channel = %channel, "Emergency contact notified");
                DispatchOutcome::Notified { contact, channel }
            }
            None => {
                warn!(stages = stages_started, "All notification attempts failed");
                DispatchOutcome::Exhausted
            }
        };

        Ok(DispatchReport {
            event_id: event.id.clone(),
            device_id: event.device_id.clone(),
            outcome,
            stages_started,
            attempts: self.attempts(&event.id),
        })
    }

    /// Record a delivery receipt for an attempt that was only `sent`
    pub async fn confirm_delivery(
        &self,
        event_id: &EventId,
        contact: &str,
        channel: Channel,
    ) -> SentinelResult<NotificationAttempt> {
        let (device_id, last) = {
            let log = self
                .inner
                .logs
                .get(event_id)
                .ok_or_else(|| SentinelError::EventNotFound(event_id.clone()))?;
            let last = log
                .attempts
                .iter()
                .rev()
                .find(|a| a.contact.name == contact && a.channel == channel)
                .cloned()
                .ok_or_else(|| SentinelError::EventNotFound(event_id.clone()))?;
            (log.device_id.clone(), last)
        };

        if last.status == DeliveryStatus::Delivered {
            return Ok(last);
        }

        let confirmed = NotificationAttempt {
            status: DeliveryStatus::Delivered,
            attempted_at: Utc::now(),
            detail: Some("delivery confirmed".to_string()),
            ..last
        };
        self.inner.append(&device_id, confirmed.clone()).await;

        if let Some(waiter) = self.inner.waiters.get(event_id) {
            let _ = waiter.send((contact.to_string(), channel));
        }
        Ok(confirmed)
    }

    /// Attempt records for an event, oldest first
    pub fn attempts(&self, event_id: &EventId) -> Vec<NotificationAttempt> {
        self.inner
            .logs
            .get(event_id)
            .map(|log| log.attempts.clone())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("channels", &self.inner.channels)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl DispatchInner {
    fn open_log(&self, event: &EmergencyEvent) {
        let created = match self.logs.entry(event.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(AttemptLog {
                    device_id: event.device_id.clone(),
                    attempts: Vec::new(),
                });
                true
            }
            Entry::Occupied(_) => false,
        };
        if !created {
            return;
        }

        let mut order = self.log_order.lock();
        order.push_back(event.id.clone());
        while order.len() > self.config.log_retention {
            if let Some(evicted) = order.pop_front() {
                self.logs.remove(&evicted);
                debug!(event_id = %evicted, "Attempt log evicted");
            }
        }
    }

    /// Evicted logs are not recreated; the audit trail still gets the entry
    async fn append(&self, device_id: &DeviceId, attempt: NotificationAttempt) {
        if let Some(mut log) = self.logs.get_mut(&attempt.event_id) {
            log.attempts.push(attempt.clone());
        }
        self.audit
            .record(PartialAuditEntry::notification_attempt(ACTOR, device_id, &attempt))
            .await;
    }
}

/// Primary alone first, then every other contact alone, in order
fn plan_stages(contacts: Vec<EmergencyContact>) -> Vec<Vec<EmergencyContact>> {
    let (primary, others): (Vec<_>, Vec<_>) = contacts.into_iter().partition(|c| c.is_primary);
    primary
        .into_iter()
        .chain(others)
        .map(|contact| vec![contact])
        .collect()
}

/// Deliver over one channel with retries; returns the final status
async fn deliver(
    inner: Arc<DispatchInner>,
    event_id: EventId,
    device_id: DeviceId,
    contact: EmergencyContact,
    channel: Channel,
    message: AlertMessage,
) -> (DeliveryStatus, String, Channel) {
    let record = |status: DeliveryStatus, retry_count: u32, detail: Option<String>| {
        NotificationAttempt {
            event_id: event_id.clone(),
            contact: contact.clone(),
            channel,
            status,
            attempted_at: Utc::now(),
            retry_count,
            detail,
        }
    };

    inner
        .append(&device_id, record(DeliveryStatus::Queued, 0, None))
        .await;

    let Some(sender) = inner.channels.get(channel) else {
        let detail = ChannelError::NotConfigured(channel).to_string();
        warn!(contact = %contact.name, channel = %channel, "No sender configured");
        inner
            .append(&device_id, record(DeliveryStatus::Failed, 0, Some(detail)))
            .await;
        return (DeliveryStatus::Failed, contact.name.clone(), channel);
    };

    let retry = &inner.config.retry;
    let mut attempt = 1u32;
    loop {
        let result = match inner.permits.clone().acquire_owned().await {
            Ok(_permit) => sender.send(&contact, &message).await,
            Err(_) => Err(ChannelError::Unavailable("dispatcher closed".into())),
        };

        match result {
            Ok(delivery) => {
                let status = match delivery {
                    Delivery::Delivered => DeliveryStatus::Delivered,
                    Delivery::Sent => DeliveryStatus::Sent,
                };
                debug!(contact = %contact.name, channel = %channel, status = %status, "Alert sent");
                inner
                    .append(&device_id, record(status, attempt - 1, None))
                    .await;
                return (status, contact.name.clone(), channel);
            }
            Err(e) => {
                inner
                    .append(
                        &device_id,
                        record(DeliveryStatus::Failed, attempt - 1, Some(e.to_string())),
                    )
                    .await;

                if !e.is_retryable() || !retry.allows_retry(attempt) {
                    warn!(
                        contact = %contact.name,
                        channel = %channel,
                        attempts = attempt,
                        error = %e,
                        "Channel delivery failed"
                    );
                    return (DeliveryStatus::Failed, contact.name.clone(), channel);
                }

                let delay = retry.delay_after(attempt);
                debug!(
                    contact = %contact.name,
                    channel = %channel,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying channel delivery"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelSender;
    use async_trait::async_trait;
    use sentinel_audit::MemoryAuditSink;
    use sentinel_types::{BreachSide, DeviceRegistration, RetryPolicy, ThresholdBreach, VitalName};
    use std::collections::HashMap;
    use std::time::Duration;

    type Calls = Arc<Mutex<Vec<(String, Channel, Instant)>>>;

    /// Sender with a per-contact scripted answer; unscripted contacts get
    /// `Delivered`
    struct ScriptedSender {
        channel: Channel,
        script: HashMap<String, Result<Delivery, ChannelError>>,
        calls: Calls,
    }

    #[async_trait]
    impl ChannelSender for ScriptedSender {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(
            &self,
            contact: &EmergencyContact,
            _message: &AlertMessage,
        ) -> Result<Delivery, ChannelError> {
            self.calls
                .lock()
                .push((contact.name.clone(), self.channel, Instant::now()));
            self.script
                .get(&contact.name)
                .cloned()
                .unwrap_or(Ok(Delivery::Delivered))
        }
    }

    struct Fixture {
        dispatcher: NotificationDispatcher,
        audit: Arc<MemoryAuditSink>,
        calls: Calls,
        event: EmergencyEvent,
    }

    fn fixture(
        contacts: Vec<EmergencyContact>,
        script: &[(Channel, &str, Result<Delivery, ChannelError>)],
    ) -> Fixture {
        let config = DispatchConfig {
            retry: RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)),
            ..Default::default()
        };
        fixture_with(contacts, script, config)
    }

    fn fixture_with(
        contacts: Vec<EmergencyContact>,
        script: &[(Channel, &str, Result<Delivery, ChannelError>)],
        config: DispatchConfig,
    ) -> Fixture {
        let registry = Arc::new(DeviceRegistry::new());
        let mut registration = DeviceRegistration::new("watch-1", "patient-1");
        registration.contacts = contacts;
        registry.register(registration).unwrap();

        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let mut channels = ChannelSet::new();
        for channel in [Channel::Sms, Channel::Email] {
            let script = script
                .iter()
                .filter(|(ch, _, _)| *ch == channel)
                .map(|(_, name, result)| (name.to_string(), result.clone()))
                .collect();
            channels = channels.with(Arc::new(ScriptedSender {
                channel,
                script,
                calls: calls.clone(),
            }));
        }

        let (audit, sink) = AuditTrail::in_memory();
        let dispatcher = NotificationDispatcher::new(registry, channels, audit, config).unwrap();

        let event = EmergencyEvent::open(
            DeviceId::new("watch-1"),
            "patient-1".into(),
            VitalName::HeartRate,
            130.0,
            ThresholdBreach {
                side: BreachSide::AboveMax,
                limit: 120.0,
            },
            Utc::now(),
        );

        Fixture {
            dispatcher,
            audit: sink,
            calls,
            event,
        }
    }

    fn primary() -> EmergencyContact {
        EmergencyContact::new("Jane Doe", "spouse", "+1-555-0100")
            .with_email("jane@example.com")
            .with_channel(Channel::Sms)
            .with_channel(Channel::Email)
            .primary()
    }

    fn secondary() -> EmergencyContact {
        EmergencyContact::new("John Doe", "brother", "+1-555-0101")
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_in_parallel_then_secondary_after_window() {
        let f = fixture(
            vec![secondary(), primary()],
            &[
                (Channel::Sms, "Jane Doe", Ok(Delivery::Sent)),
                (Channel::Email, "Jane Doe", Ok(Delivery::Sent)),
            ],
        );
        let start = Instant::now();

        let report = f.dispatcher.notify(&f.event).await.unwrap();

        assert_eq!(
            report.outcome,
            DispatchOutcome::Notified {
                contact: "John Doe".into(),
                channel: Channel::Sms
            }
        );
        assert_eq!(report.stages_started, 2);

        let calls = f.calls.lock().clone();
        assert_eq!(calls.len(), 3);
        let primary_calls: Vec<_> = calls.iter().filter(|c| c.0 == "Jane Doe").collect();
        assert_eq!(primary_calls.len(), 2);
        assert!(primary_calls.iter().all(|c| c.2 - start < Duration::from_millis(1)));

        let (_, channel, at) = calls.iter().find(|c| c.0 == "John Doe").unwrap();
        assert_eq!(*channel, Channel::Sms);
        assert!(*at - start >= Duration::from_secs(30));
        assert!(*at - start < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_delivery_skips_secondary() {
        let f = fixture(vec![primary(), secondary()], &[]);

        let report = f.dispatcher.notify(&f.event).await.unwrap();

        assert!(report.is_notified());
        assert_eq!(report.stages_started, 1);
        assert!(f.calls.lock().iter().all(|c| c.0 == "Jane Doe"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_channel_does_not_block_others() {
        let f = fixture(
            vec![primary()],
            &[(
                Channel::Sms,
                "Jane Doe",
                Err(ChannelError::Unavailable("gateway down".into())),
            )],
        );

        let report = f.dispatcher.notify(&f.event).await.unwrap();
        assert_eq!(
            report.outcome,
            DispatchOutcome::Notified {
                contact: "Jane Doe".into(),
                channel: Channel::Email
            }
        );

        // Let the detached sms retries finish
        tokio::time::sleep(Duration::from_secs(5)).await;
        let sms: Vec<_> = f
            .dispatcher
            .attempts(&f.event.id)
            .into_iter()
            .filter(|a| a.channel == Channel::Sms && a.status == DeliveryStatus::Failed)
            .map(|a| a.retry_count)
            .collect();
        assert_eq!(sms, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_channels_failing_is_exhausted() {
        let f = fixture(
            vec![primary(), secondary()],
            &[
                (Channel::Sms, "Jane Doe", Err(ChannelError::Rejected("blocked".into()))),
                (Channel::Email, "Jane Doe", Err(ChannelError::Rejected("bounced".into()))),
                (
                    Channel::Sms,
                    "John Doe",
                    Err(ChannelError::Unavailable("gateway down".into())),
                ),
            ],
        );
        let start = Instant::now();

        let report = f.dispatcher.notify(&f.event).await.unwrap();

        assert_eq!(report.outcome, DispatchOutcome::Exhausted);
        assert_eq!(report.stages_started, 2);
        // Primary failed outright, so the secondary did not wait out the window
        assert!(Instant::now() - start < Duration::from_secs(30));
        assert!(matches!(
            report.into_result(),
            Err(SentinelError::NotificationExhausted(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_settles_dispatch() {
        let f = fixture(
            vec![primary(), secondary()],
            &[
                (Channel::Sms, "Jane Doe", Ok(Delivery::Sent)),
                (Channel::Email, "Jane Doe", Ok(Delivery::Sent)),
            ],
        );

        let dispatcher = f.dispatcher.clone();
        let event = f.event.clone();
        let pending = tokio::spawn(async move { dispatcher.notify(&event).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        let confirmed = f
            .dispatcher
            .confirm_delivery(&f.event.id, "Jane Doe", Channel::Email)
            .await
            .unwrap();
        assert_eq!(confirmed.status, DeliveryStatus::Delivered);

        let report = pending.await.unwrap().unwrap();
        assert_eq!(report.stages_started, 1);
        assert_eq!(
            report.outcome,
            DispatchOutcome::Notified {
                contact: "Jane Doe".into(),
                channel: Channel::Email
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_channel_fails_immediately() {
        let contact = EmergencyContact::new("Jane Doe", "spouse", "+1-555-0100")
            .with_channel(Channel::Push)
            .primary();
        let f = fixture(vec![contact], &[]);

        let report = f.dispatcher.notify(&f.event).await.unwrap();
        assert_eq!(report.outcome, DispatchOutcome::Exhausted);
        assert!(f.calls.lock().is_empty());

        let statuses: Vec<_> = report.attempts.iter().map(|a| a.status).collect();
        assert_eq!(statuses, vec![DeliveryStatus::Queued, DeliveryStatus::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_logs_are_bounded() {
        let f = fixture_with(
            vec![primary()],
            &[],
            DispatchConfig {
                log_retention: 2,
                ..Default::default()
            },
        );
        let events: Vec<EmergencyEvent> = (0..3)
            .map(|i| {
                EmergencyEvent::open(
                    DeviceId::new("watch-1"),
                    "patient-1".into(),
                    VitalName::HeartRate,
                    130.0 + i as f64,
                    ThresholdBreach {
                        side: BreachSide::AboveMax,
                        limit: 120.0,
                    },
                    Utc::now(),
                )
            })
            .collect();

        for event in &events {
            assert!(f.dispatcher.notify(event).await.unwrap().is_notified());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(f.dispatcher.attempts(&events[0].id).is_empty());
        assert!(!f.dispatcher.attempts(&events[1].id).is_empty());
        assert!(!f.dispatcher.attempts(&events[2].id).is_empty());
        assert!(matches!(
            f.dispatcher
                .confirm_delivery(&events[0].id, "Jane Doe", Channel::Sms)
                .await,
            Err(SentinelError::EventNotFound(_))
        ));
        // The audit trail keeps every attempt regardless
        assert!(!f.audit.entries_for_event(&events[0].id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_audited() {
        let f = fixture(vec![primary()], &[]);
        let report = f.dispatcher.notify(&f.event).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let audited = f.audit.entries_for_event(&report.event_id);
        assert_eq!(audited.len(), f.dispatcher.attempts(&report.event_id).len());
        assert!(!audited.is_empty());
    }
}
