//! Thread-safe registry of discovered devices

use crate::bluetooth::device::Device;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Result of inserting a device into the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    /// The id was unknown; the stored value is returned
    Inserted(Device),
    /// The id already existed; flags were refreshed, the name was kept
    Updated(Device),
}

impl Upserted {
    pub fn device(&self) -> &Device {
        match self {
            Upserted::Inserted(d) | Upserted::Updated(d) => d,
        }
    }
}

/// Mapping of device id to device.
///
/// Every operation holds the lock only for its own duration and returns
/// copies, so callers are free to emit events or do I/O with the result.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Device>> {
        // A panic while holding the lock cannot leave the map half-updated,
        // every mutation is a single insert/remove/field store.
        self.devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new device, or refresh the connection flag of a known one
    pub fn upsert(&self, device: Device) -> Upserted {
        let mut devices = self.lock();
        match devices.get_mut(&device.id) {
            Some(existing) => {
                existing.is_connected = device.is_connected;
                Upserted::Updated(existing.clone())
            }
            None => {
                devices.insert(device.id.clone(), device.clone());
                Upserted::Inserted(device)
            }
        }
    }

    /// Apply `f` to the device with `id`, returning the updated value.
    ///
    /// Returns `None` without calling `f` when the id is unknown.
    pub fn update<F>(&self, id: &str, f: F) -> Option<Device>
    where
        F: FnOnce(&mut Device),
    {
        let mut devices = self.lock();
        let device = devices.get_mut(id)?;
        f(device);
        Some(device.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Device> {
        self.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.lock().get(id).cloned()
    }

    /// Copy of all devices, ordered by name (case-insensitive) then id
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.lock().values().cloned().collect();
        devices.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        devices
    }

    /// Remove every device, returning what was removed
    pub fn clear(&self) -> Vec<Device> {
        self.lock().drain().map(|(_, d)| d).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
