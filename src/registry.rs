//! Concurrent device registry.
//!
//! The registry is the single source of truth for the device model. It
//! is read by API callers and written by the dispatcher in parallel;
//! lookups and snapshots return cloned values so a caller's iteration
//! never races a concurrent update. Writers mutate under one lock, which
//! keeps every device record self-consistent per update.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::devices::Device;

/// Concurrent map of device name to device state.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Look up one device by name, returned by value.
    pub fn get(&self, name: &str) -> Option<Device> {
        self.devices.read().get(name).cloned()
    }

    /// A stable snapshot of every device.
    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.read().values().cloned().collect()
    }

    /// Insert or replace a device by name.
    pub fn store(&self, device: Device) {
        self.devices.write().insert(device.name.clone(), device);
    }

    /// Remove one device. Removing an unknown name is a no-op.
    pub fn remove(&self, name: &str) {
        self.devices.write().remove(name);
    }

    /// Drop every device.
    pub fn clear(&self) {
        self.devices.write().clear();
    }

    /// Mutate an existing device in place. Returns `None` when the
    /// device is unknown, otherwise the closure's result.
    pub fn modify<T>(&self, name: &str, f: impl FnOnce(&mut Device) -> T) -> Option<T> {
        let mut devices = self.devices.write();
        devices.get_mut(name).map(f)
    }

    /// Mutate a device, creating an empty record first if the name is
    /// new. Definitions use this; updates use [`DeviceRegistry::modify`].
    pub fn upsert(&self, name: &str, f: impl FnOnce(&mut Device)) {
        let mut devices = self.devices.write();
        let device = devices
            .entry(name.to_string())
            .or_insert_with(|| Device::new(name));
        f(device);
    }
}
