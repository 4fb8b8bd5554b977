//! Periodic vitals snapshots for live dashboards

use crate::monitor::TelemetryMonitor;
use chrono::{DateTime, Utc};
use sentinel_types::{DeviceId, EmergencyEvent, SentinelResult, VitalName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Latest readings and open events for one device at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    pub device_id: DeviceId,
    pub taken_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readings_at: Option<DateTime<Utc>>,
    pub latest: HashMap<VitalName, f64>,
    pub open_events: Vec<EmergencyEvent>,
}

/// Produces [`VitalsSubscription`]s over a monitor
#[derive(Debug, Clone)]
pub struct VitalsFeed {
    monitor: TelemetryMonitor,
    buffer: usize,
}

impl VitalsFeed {
    pub fn new(monitor: TelemetryMonitor) -> Self {
        Self { monitor, buffer: 16 }
    }

    /// Snapshots buffered per subscriber before the ticker waits
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Emit a snapshot for `device_id` every `interval`, starting now.
    ///
    /// The stream ends when the subscription is cancelled or dropped.
    pub fn subscribe(
        &self,
        device_id: &DeviceId,
        interval: Duration,
    ) -> SentinelResult<VitalsSubscription> {
        self.monitor.registry().get(device_id)?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let token = CancellationToken::new();
        let monitor = self.monitor.clone();
        let device_id = device_id.clone();
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = match snapshot(&monitor, &device_id).await {
                            Ok(s) => s,
                            Err(e) => {
                                debug!(device_id = %device_id, error = %e, "Vitals feed ended");
                                break;
                            }
                        };
                        tokio::select! {
                            _ = child.cancelled() => break,
                            sent = tx.send(snapshot) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(VitalsSubscription { rx, token, handle })
    }
}

async fn snapshot(monitor: &TelemetryMonitor, device_id: &DeviceId) -> SentinelResult<VitalsSnapshot> {
    let latest = monitor.latest_readings(device_id).await?;
    let open_events = monitor.open_events(device_id).await?;
    let (readings_at, latest) = match latest {
        Some(sample) => (Some(sample.timestamp), sample.readings),
        None => (None, HashMap::new()),
    };
    Ok(VitalsSnapshot {
        device_id: device_id.clone(),
        taken_at: Utc::now(),
        readings_at,
        latest,
        open_events,
    })
}

/// Receiving half of a vitals feed. Dropping it stops the ticker.
#[derive(Debug)]
pub struct VitalsSubscription {
    rx: mpsc::Receiver<VitalsSnapshot>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl VitalsSubscription {
    /// Next snapshot, or `None` once the feed has stopped
    pub async fn recv(&mut self) -> Option<VitalsSnapshot> {
        self.rx.recv().await
    }

    /// Stop the feed and wait for the ticker to exit
    pub async fn cancel(mut self) {
        self.token.cancel();
        let _ = (&mut self.handle).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for VitalsSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
