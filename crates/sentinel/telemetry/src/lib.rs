//! Device telemetry for MediSentinel
//!
//! - [`DeviceRegistry`]: devices, thresholds, emergency contacts
//! - [`TelemetryMonitor`]: ordered sample ingest and breach debouncing
//! - [`NotificationDispatcher`]: staged contact fan-out over [`ChannelSender`]s
//! - [`VitalsFeed`]: periodic snapshots for live views

#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod feed;
pub mod monitor;
pub mod registry;

pub use channel::{AlertMessage, ChannelError, ChannelSender, ChannelSet, Delivery, LogChannel};
pub use config::{DispatchConfig, MonitorConfig};
pub use dispatcher::{DispatchOutcome, DispatchReport, NotificationDispatcher};
pub use feed::{VitalsFeed, VitalsSnapshot, VitalsSubscription};
pub use monitor::{EmergencyAssessment, IngestReport, TelemetryEvent, TelemetryMonitor, VitalBreach};
pub use registry::DeviceRegistry;
