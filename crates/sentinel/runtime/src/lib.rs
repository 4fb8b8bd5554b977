//! MediSentinel runtime
//!
//! Configuration loading, tracing bootstrap, built-in step adapters and the
//! [`Sentinel`] service facade.

#![deny(unsafe_code)]

pub mod builtin;
pub mod config;
pub mod logging;
pub mod service;

pub use builtin::{builtin_adapters, DeviceStepAdapter};
pub use config::{AuditConfig, EscalationConfig, LoggingConfig, SentinelConfig};
pub use logging::init_tracing;
pub use service::{DeviceStatus, EscalationOutcome, Sentinel, SentinelBuilder};
