//! Device registry: devices, their thresholds and emergency contacts

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sentinel_types::{
    Device, DeviceId, DeviceRegistration, EmergencyContact, SentinelError, SentinelResult,
    ThresholdSet,
};
use tracing::info;

/// Registered devices keyed by id
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device. Thresholds default to the standard adult set.
    pub fn register(&self, registration: DeviceRegistration) -> SentinelResult<Device> {
        let primaries = registration.contacts.iter().filter(|c| c.is_primary).count();
        if primaries > 1 {
            return Err(SentinelError::PrimaryConflict(registration.device_id));
        }

        let now = Utc::now();
        let device = Device {
            device_id: registration.device_id.clone(),
            patient_id: registration.patient_id,
            device_type: registration.device_type,
            device_model: registration.device_model,
            registered_at: now,
            thresholds: registration
                .thresholds
                .unwrap_or_else(ThresholdSet::standard_adult),
            contacts: registration.contacts,
            last_sample_at: None,
            updated_at: now,
        };

        match self.devices.entry(registration.device_id) {
            Entry::Occupied(slot) => Err(SentinelError::DuplicateDevice(slot.key().clone())),
            Entry::Vacant(slot) => {
                info!(
                    device_id = %device.device_id,
                    patient_id = %device.patient_id,
                    contacts = device.contacts.len(),
                    "Device registered"
                );
                slot.insert(device.clone());
                Ok(device)
            }
        }
    }

    pub fn get(&self, id: &DeviceId) -> SentinelResult<Device> {
        self.devices
            .get(id)
            .map(|d| d.value().clone())
            .ok_or_else(|| SentinelError::DeviceNotFound(id.clone()))
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// All devices, oldest registration first
    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.iter().map(|d| d.value().clone()).collect();
        devices.sort_by_key(|d| d.registered_at);
        devices
    }

    pub fn update_thresholds(
        &self,
        id: &DeviceId,
        thresholds: ThresholdSet,
    ) -> SentinelResult<Device> {
        self.modify(id, |device| {
            device.thresholds = thresholds;
            Ok(())
        })
    }

    /// Append a contact. A second primary is rejected; demote first.
    pub fn add_contact(&self, id: &DeviceId, contact: EmergencyContact) -> SentinelResult<Device> {
        self.modify(id, |device| {
            if contact.is_primary && device.primary_contact().is_some() {
                return Err(SentinelError::PrimaryConflict(device.device_id.clone()));
            }
            info!(
                device_id = %device.device_id,
                contact = %contact.name,
                primary = contact.is_primary,
                "Emergency contact added"
            );
            device.contacts.push(contact);
            Ok(())
        })
    }

    /// Clear the primary flag on the device's primary contact, if any
    pub fn demote_primary(&self, id: &DeviceId) -> SentinelResult<Device> {
        self.modify(id, |device| {
            for contact in device.contacts.iter_mut() {
                contact.is_primary = false;
            }
            Ok(())
        })
    }

    /// Contacts in registration order
    pub fn get_contacts(&self, id: &DeviceId) -> SentinelResult<Vec<EmergencyContact>> {
        self.devices
            .get(id)
            .map(|d| d.contacts.clone())
            .ok_or_else(|| SentinelError::DeviceNotFound(id.clone()))
    }

    /// Note the timestamp of an accepted sample
    pub fn record_sample(&self, id: &DeviceId, at: DateTime<Utc>) -> SentinelResult<()> {
        let mut device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| SentinelError::DeviceNotFound(id.clone()))?;
        if device.last_sample_at.map_or(true, |last| at > last) {
            device.last_sample_at = Some(at);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn modify(
        &self,
        id: &DeviceId,
        f: impl FnOnce(&mut Device) -> SentinelResult<()>,
    ) -> SentinelResult<Device> {
        let mut device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| SentinelError::DeviceNotFound(id.clone()))?;
        f(&mut device)?;
        device.updated_at = Utc::now();
        Ok(device.clone())
    }
}
