//! Telemetry monitor: threshold evaluation and emergency-event debouncing
//!
//! Samples for one device are applied in order under that device's lock;
//! different devices proceed in parallel. One breach episode per
//! (device, vital) is tracked as an [`EmergencyEvent`]. Only opening an
//! episode notifies contacts. Exhausted dispatches additionally go to the
//! receiver handed out by [`TelemetryMonitor::escalations`], which never
//! drops a report.

use crate::config::MonitorConfig;
use crate::dispatcher::{DispatchReport, NotificationDispatcher};
use crate::registry::DeviceRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sentinel_types::{
    AckState, DeviceId, EmergencyEvent, EventId, PatientId, SentinelError, SentinelResult,
    ThresholdBreach, VitalName, VitalSample,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Published on the monitor's event bus
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    Opened(EmergencyEvent),
    Updated(EmergencyEvent),
    Closed(EmergencyEvent),
    Acknowledged(EmergencyEvent),
    /// Notification fan-out for an opened event has concluded
    Dispatched(DispatchReport),
}

/// What one sample changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub opened: Vec<EmergencyEvent>,
    pub updated: Vec<EmergencyEvent>,
    pub closed: Vec<EmergencyEvent>,
}

impl IngestReport {
    pub fn is_quiet(&self) -> bool {
        self.opened.is_empty() && self.updated.is_empty() && self.closed.is_empty()
    }
}

/// One vital currently outside its bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalBreach {
    pub vital: VitalName,
    pub value: f64,
    pub breach: ThresholdBreach,
}

/// Read-only re-assessment of a device's latest readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAssessment {
    pub device_id: DeviceId,
    pub patient_id: PatientId,
    pub assessed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readings_at: Option<DateTime<Utc>>,
    pub breaches: Vec<VitalBreach>,
    pub open_events: Vec<EmergencyEvent>,
}

impl EmergencyAssessment {
    pub fn is_emergency(&self) -> bool {
        !self.breaches.is_empty()
    }

    /// Human-readable condition lines, e.g. `heart_rate 130 (above max 120)`
    pub fn conditions(&self) -> Vec<String> {
        self.breaches
            .iter()
            .map(|b| format!("{} {} ({})", b.vital, b.value, b.breach))
            .collect()
    }
}

struct Episode {
    event: EmergencyEvent,
    in_bounds_streak: u32,
}

#[derive(Default)]
struct DeviceState {
    last_timestamp: Option<DateTime<Utc>>,
    latest: HashMap<VitalName, f64>,
    window: VecDeque<VitalSample>,
    open: HashMap<VitalName, Episode>,
    closed: VecDeque<EmergencyEvent>,
}

struct MonitorInner {
    registry: Arc<DeviceRegistry>,
    dispatcher: NotificationDispatcher,
    config: MonitorConfig,
    devices: DashMap<DeviceId, Arc<Mutex<DeviceState>>>,
    /// Open or recently closed event → its device
    event_index: DashMap<EventId, DeviceId>,
    bus: broadcast::Sender<TelemetryEvent>,
    escalation: parking_lot::Mutex<Option<mpsc::Sender<DispatchReport>>>,
}

/// Evaluates device samples and raises emergency events
#[derive(Clone)]
pub struct TelemetryMonitor {
    inner: Arc<MonitorInner>,
}

impl TelemetryMonitor {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        dispatcher: NotificationDispatcher,
        config: MonitorConfig,
    ) -> SentinelResult<Self> {
        config.validate()?;
        let (bus, _) = broadcast::channel(config.bus_capacity);
        Ok(Self {
            inner: Arc::new(MonitorInner {
                registry,
                dispatcher,
                config,
                devices: DashMap::new(),
                event_index: DashMap::new(),
                bus,
                escalation: parking_lot::Mutex::new(None),
            }),
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.inner.dispatcher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.inner.bus.subscribe()
    }

    /// Route every exhausted dispatch report to the returned receiver.
    ///
    /// Unlike the broadcast bus this channel applies backpressure to the
    /// dispatch task instead of skipping reports. A later call replaces the
    /// earlier receiver.
    pub fn escalations(&self) -> mpsc::Receiver<DispatchReport> {
        let (tx, rx) = mpsc::channel(self.inner.config.bus_capacity);
        *self.inner.escalation.lock() = Some(tx);
        rx
    }

    // ── Ingest ───────────────────────────────────────────────────────

    /// Apply one sample: store readings, evaluate thresholds, open, update
    /// or close events. Each newly opened event is dispatched on its own
    /// task.
    #[instrument(skip_all, fields(device_id = %sample.device_id))]
    pub async fn ingest(&self, sample: VitalSample) -> SentinelResult<IngestReport> {
        let device = self.inner.registry.get(&sample.device_id)?;
        if let Some((&vital, &value)) = sample.readings.iter().find(|(_, v)| !v.is_finite()) {
            warn!(vital = %vital, value, "Non-finite reading rejected");
            return Err(SentinelError::InvalidReading {
                device_id: sample.device_id,
                vital,
                value,
            });
        }
        let state = self.state_for(&sample.device_id);
        let mut st = state.lock().await;

        if let Some(latest) = st.last_timestamp {
            if sample.timestamp < latest {
                warn!(timestamp = %sample.timestamp, latest = %latest, "Out-of-order sample rejected");
                return Err(SentinelError::OutOfOrderSample {
                    device_id: sample.device_id,
                    timestamp: sample.timestamp,
                    latest,
                });
            }
        }

        st.last_timestamp = Some(sample.timestamp);
        for (vital, value) in &sample.readings {
            st.latest.insert(*vital, *value);
        }
        st.window.push_back(sample.clone());
        while st.window.len() > self.inner.config.window_len {
            st.window.pop_front();
        }
        self.inner
            .registry
            .record_sample(&sample.device_id, sample.timestamp)?;

        let mut report = IngestReport::default();
        for vital in VitalName::ALL {
            let Some(&value) = sample.readings.get(&vital) else {
                continue;
            };
            if !device.thresholds.is_configured(vital) {
                continue;
            }

            let breach = device.thresholds.evaluate(vital, value);
            match (breach, st.open.get_mut(&vital)) {
                (Some(breach), None) => {
                    let event = EmergencyEvent::open(
                        device.device_id.clone(),
                        device.patient_id.clone(),
                        vital,
                        value,
                        breach,
                        sample.timestamp,
                    );
                    warn!(
                        event_id = %event.id,
                        vital = %vital,
                        value,
                        threshold = %breach,
                        "Emergency event opened"
                    );
                    self.inner
                        .event_index
                        .insert(event.id.clone(), device.device_id.clone());
                    st.open.insert(
                        vital,
                        Episode {
                            event: event.clone(),
                            in_bounds_streak: 0,
                        },
                    );
                    report.opened.push(event);
                }
                (Some(breach), Some(episode)) => {
                    episode.event.value = value;
                    episode.event.raised_at = sample.timestamp;
                    episode.event.threshold_breached = breach;
                    episode.in_bounds_streak = 0;
                    debug!(event_id = %episode.event.id, vital = %vital, value, "Emergency event updated");
                    report.updated.push(episode.event.clone());
                }
                (None, Some(episode)) => {
                    episode.in_bounds_streak += 1;
                    if episode.in_bounds_streak >= self.inner.config.close_after_in_bounds {
                        if let Some(closed) = self.inner.close(&mut st, vital, sample.timestamp) {
                            info!(event_id = %closed.id, vital = %vital, "Emergency event closed");
                            report.closed.push(closed);
                        }
                    }
                }
                (None, None) => {}
            }
        }

        // Thresholds removed since the episode opened
        let unmonitored: Vec<VitalName> = st
            .open
            .keys()
            .copied()
            .filter(|vital| !device.thresholds.is_configured(*vital))
            .collect();
        for vital in unmonitored {
            if let Some(closed) = self.inner.close(&mut st, vital, sample.timestamp) {
                info!(event_id = %closed.id, vital = %vital, "Emergency event closed, vital no longer monitored");
                report.closed.push(closed);
            }
        }
        drop(st);

        self.publish(&report);
        for event in &report.opened {
            self.spawn_dispatch(event.clone());
        }
        Ok(report)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Re-assess the latest readings against the device's current
    /// thresholds. Changes nothing.
    pub async fn check_emergency_conditions(
        &self,
        device_id: &DeviceId,
    ) -> SentinelResult<EmergencyAssessment> {
        let device = self.inner.registry.get(device_id)?;
        let (latest, readings_at, open_events) = match self.existing_state(device_id) {
            Some(state) => {
                let st = state.lock().await;
                (st.latest.clone(), st.last_timestamp, open_of(&st))
            }
            None => (HashMap::new(), None, Vec::new()),
        };

        let breaches = VitalName::ALL
            .into_iter()
            .filter_map(|vital| {
                let value = *latest.get(&vital)?;
                device
                    .thresholds
                    .evaluate(vital, value)
                    .map(|breach| VitalBreach { vital, value, breach })
            })
            .collect();

        Ok(EmergencyAssessment {
            device_id: device.device_id,
            patient_id: device.patient_id,
            assessed_at: Utc::now(),
            readings_at,
            breaches,
            open_events,
        })
    }

    /// Most recent value of every vital, stamped with the last sample time
    pub async fn latest_readings(&self, device_id: &DeviceId) -> SentinelResult<Option<VitalSample>> {
        self.inner.registry.get(device_id)?;
        let Some(state) = self.existing_state(device_id) else {
            return Ok(None);
        };
        let st = state.lock().await;
        Ok(st.last_timestamp.map(|ts| VitalSample {
            device_id: device_id.clone(),
            timestamp: ts,
            readings: st.latest.clone(),
        }))
    }

    /// The most recent samples, oldest first
    pub async fn recent_samples(&self, device_id: &DeviceId) -> SentinelResult<Vec<VitalSample>> {
        self.inner.registry.get(device_id)?;
        Ok(match self.existing_state(device_id) {
            Some(state) => state.lock().await.window.iter().cloned().collect(),
            None => Vec::new(),
        })
    }

    pub async fn open_events(&self, device_id: &DeviceId) -> SentinelResult<Vec<EmergencyEvent>> {
        self.inner.registry.get(device_id)?;
        Ok(match self.existing_state(device_id) {
            Some(state) => open_of(&*state.lock().await),
            None => Vec::new(),
        })
    }

    /// Closed events, most recent last
    pub async fn recent_events(&self, device_id: &DeviceId) -> SentinelResult<Vec<EmergencyEvent>> {
        self.inner.registry.get(device_id)?;
        Ok(match self.existing_state(device_id) {
            Some(state) => state.lock().await.closed.iter().cloned().collect(),
            None => Vec::new(),
        })
    }

    /// Mark an open event acknowledged. It stays open until readings
    /// return in bounds.
    pub async fn acknowledge(&self, event_id: &EventId) -> SentinelResult<EmergencyEvent> {
        let device_id = self
            .inner
            .event_index
            .get(event_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| SentinelError::EventNotFound(event_id.clone()))?;
        let state = self
            .existing_state(&device_id)
            .ok_or_else(|| SentinelError::EventNotFound(event_id.clone()))?;

        let event = {
            let mut st = state.lock().await;
            let episode = st
                .open
                .values_mut()
                .find(|e| &e.event.id == event_id)
                .ok_or_else(|| SentinelError::EventNotFound(event_id.clone()))?;
            episode.event.ack_state = AckState::Acknowledged;
            episode.event.clone()
        };

        info!(event_id = %event_id, device_id = %device_id, "Emergency event acknowledged");
        let _ = self.inner.bus.send(TelemetryEvent::Acknowledged(event.clone()));
        Ok(event)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn state_for(&self, device_id: &DeviceId) -> Arc<Mutex<DeviceState>> {
        self.inner
            .devices
            .entry(device_id.clone())
            .or_default()
            .value()
            .clone()
    }

    fn existing_state(&self, device_id: &DeviceId) -> Option<Arc<Mutex<DeviceState>>> {
        self.inner.devices.get(device_id).map(|s| s.value().clone())
    }

    fn publish(&self, report: &IngestReport) {
        let bus = &self.inner.bus;
        for event in &report.opened {
            let _ = bus.send(TelemetryEvent::Opened(event.clone()));
        }
        for event in &report.updated {
            let _ = bus.send(TelemetryEvent::Updated(event.clone()));
        }
        for event in &report.closed {
            let _ = bus.send(TelemetryEvent::Closed(event.clone()));
        }
    }

    fn spawn_dispatch(&self, event: EmergencyEvent) {
        let dispatcher = self.inner.dispatcher.clone();
        let bus = self.inner.bus.clone();
        let escalation = self.inner.escalation.lock().clone();
        tokio::spawn(async move {
            match dispatcher.notify(&event).await {
                Ok(report) => {
                    if !report.is_notified() {
                        if let Some(tx) = escalation {
                            if tx.send(report.clone()).await.is_err() {
                                error!(event_id = %event.id, "Escalation receiver gone, exhausted dispatch not escalated");
                            }
                        }
                    }
                    let _ = bus.send(TelemetryEvent::Dispatched(report));
                }
                Err(e) => error!(event_id = %event.id, error = %e, "Notification dispatch failed"),
            }
        });
    }
}

impl std::fmt::Debug for TelemetryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryMonitor")
            .field("config", &self.inner.config)
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

impl MonitorInner {
    /// Move an open episode into the bounded closed history
    fn close(
        &self,
        st: &mut DeviceState,
        vital: VitalName,
        at: DateTime<Utc>,
    ) -> Option<EmergencyEvent> {
        let mut closed = st.open.remove(&vital)?.event;
        closed.ack_state = AckState::Closed;
        closed.closed_at = Some(at);
        st.closed.push_back(closed.clone());
        while st.closed.len() > self.config.event_history {
            if let Some(old) = st.closed.pop_front() {
                self.event_index.remove(&old.id);
            }
        }
        Some(closed)
    }
}

fn open_of(state: &DeviceState) -> Vec<EmergencyEvent> {
    let mut events: Vec<EmergencyEvent> = state.open.values().map(|e| e.event.clone()).collect();
    events.sort_by_key(|e| e.opened_at);
    events
}
