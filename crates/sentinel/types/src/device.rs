//! Devices, emergency thresholds and emergency contacts

use crate::{DeviceId, PatientId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ── Vitals ───────────────────────────────────────────────────────────

/// Vital signs the monitor knows how to evaluate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalName {
    HeartRate,
    BloodPressureSystolic,
    BloodPressureDiastolic,
    /// Degrees Fahrenheit
    Temperature,
    /// Percent
    OxygenSaturation,
}

impl VitalName {
    pub const ALL: [VitalName; 5] = [
        VitalName::HeartRate,
        VitalName::BloodPressureSystolic,
        VitalName::BloodPressureDiastolic,
        VitalName::Temperature,
        VitalName::OxygenSaturation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VitalName::HeartRate => "heart_rate",
            VitalName::BloodPressureSystolic => "blood_pressure_systolic",
            VitalName::BloodPressureDiastolic => "blood_pressure_diastolic",
            VitalName::Temperature => "temperature",
            VitalName::OxygenSaturation => "oxygen_saturation",
        }
    }
}

impl std::fmt::Display for VitalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Thresholds ───────────────────────────────────────────────────────

/// Which side of the safe range a reading fell out of
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachSide {
    BelowMin,
    AboveMax,
}

/// The bound a reading crossed
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBreach {
    pub side: BreachSide,
    pub limit: f64,
}

impl std::fmt::Display for ThresholdBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.side {
            BreachSide::BelowMin => write!(f, "below min {}", self.limit),
            BreachSide::AboveMax => write!(f, "above max {}", self.limit),
        }
    }
}

/// Safe range for one vital; a missing bound is unbounded on that side
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// The bound crossed by `value`, if any. Values equal to a bound are safe.
    pub fn breach(&self, value: f64) -> Option<ThresholdBreach> {
        if let Some(min) = self.min {
            if value < min {
                return Some(ThresholdBreach {
                    side: BreachSide::BelowMin,
                    limit: min,
                });
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Some(ThresholdBreach {
                    side: BreachSide::AboveMax,
                    limit: max,
                });
            }
        }
        None
    }

    pub fn contains(&self, value: f64) -> bool {
        self.breach(value).is_none()
    }
}

/// Per-vital safe ranges for a device
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdSet {
    bounds: HashMap<VitalName, Bounds>,
}

impl ThresholdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adult resting ranges used when a device registers without its own
    pub fn standard_adult() -> Self {
        Self::new()
            .with(VitalName::HeartRate, Bounds::new(50.0, 120.0))
            .with(VitalName::BloodPressureSystolic, Bounds::new(90.0, 140.0))
            .with(VitalName::BloodPressureDiastolic, Bounds::new(60.0, 90.0))
            .with(VitalName::Temperature, Bounds::new(95.0, 103.0))
            .with(VitalName::OxygenSaturation, Bounds::at_least(90.0))
    }

    pub fn with(mut self, vital: VitalName, bounds: Bounds) -> Self {
        self.bounds.insert(vital, bounds);
        self
    }

    pub fn set(&mut self, vital: VitalName, bounds: Bounds) {
        self.bounds.insert(vital, bounds);
    }

    pub fn get(&self, vital: VitalName) -> Option<&Bounds> {
        self.bounds.get(&vital)
    }

    /// Evaluate a reading; unconfigured vitals never breach
    pub fn evaluate(&self, vital: VitalName, value: f64) -> Option<ThresholdBreach> {
        self.bounds.get(&vital).and_then(|b| b.breach(value))
    }

    pub fn is_configured(&self, vital: VitalName) -> bool {
        self.bounds.contains_key(&vital)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VitalName, &Bounds)> {
        self.bounds.iter()
    }
}

// ── Contacts ─────────────────────────────────────────────────────────

/// Delivery channels a contact can be reached on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Push,
    Call,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sms => write!(f, "sms"),
            Channel::Email => write!(f, "email"),
            Channel::Push => write!(f, "push"),
            Channel::Call => write!(f, "call"),
        }
    }
}

/// A person to alert when a device raises an emergency
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub relationship: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub channel_prefs: BTreeSet<Channel>,
}

impl EmergencyContact {
    pub fn new(
        name: impl Into<String>,
        relationship: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            relationship: relationship.into(),
            phone: phone.into(),
            email: None,
            is_primary: false,
            channel_prefs: BTreeSet::new(),
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel_prefs.insert(channel);
        self
    }

    /// Channels to use; a contact with no stated preference gets SMS
    pub fn channels(&self) -> Vec<Channel> {
        if self.channel_prefs.is_empty() {
            vec![Channel::Sms]
        } else {
            self.channel_prefs.iter().copied().collect()
        }
    }
}

// ── Device ───────────────────────────────────────────────────────────

/// A registered telemetry device bound to a patient
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub patient_id: PatientId,
    pub device_type: String,
    pub device_model: String,
    pub registered_at: DateTime<Utc>,
    pub thresholds: ThresholdSet,
    /// Registration order; at most one entry is primary
    pub contacts: Vec<EmergencyContact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sample_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn primary_contact(&self) -> Option<&EmergencyContact> {
        self.contacts.iter().find(|c| c.is_primary)
    }
}

/// Registration request for a new device
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: DeviceId,
    pub patient_id: PatientId,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub device_model: String,
    #[serde(default)]
    pub thresholds: Option<ThresholdSet>,
    #[serde(default)]
    pub contacts: Vec<EmergencyContact>,
}

fn default_device_type() -> String {
    "smartwatch".to_string()
}

impl DeviceRegistration {
    pub fn new(device_id: impl Into<DeviceId>, patient_id: impl Into<PatientId>) -> Self {
        Self {
            device_id: device_id.into(),
            patient_id: patient_id.into(),
            device_type: default_device_type(),
            device_model: String::new(),
            thresholds: None,
            contacts: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.device_model = model.into();
        self
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdSet) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn with_contact(mut self, contact: EmergencyContact) -> Self {
        self.contacts.push(contact);
        self
    }
}
