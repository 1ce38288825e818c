// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The typed I/O device registry.
//!
//! Devices are bucketed by a type tag: a static string compared by
//! pointer identity, so every registrant of a type must name it
//! with the same static. Each bucket keeps its devices in
//! registration order and assigns ids from a per-bucket counter, so
//! a device is addressable as, say, `ldisk1`.

use crate::arch::interrupts::without_interrupts;
use core::any::Any;
use core::sync::atomic::{AtomicUsize, Ordering};
use alloc::sync::Arc;
use alloc::vec::Vec;
use lazy_static::lazy_static;

/// The type tag under which physical disks register.
///
pub static PHYSICAL_DISK: &str = "pdisk";

/// The type tag under which logical disks (partitions) register.
///
pub static LOGICAL_DISK: &str = "ldisk";

/// A registered device: its type tag, its id within the type's
/// bucket, and the owning subsystem's payload.
///
#[derive(Clone)]
pub struct DeviceHandle {
    devtype: &'static str,
    id: usize,
    data: Arc<dyn Any + Send + Sync>,
}

impl DeviceHandle {
    /// Returns the device's type tag.
    ///
    pub fn devtype(&self) -> &'static str {
        self.devtype
    }

    /// Returns the device's id within its type bucket.
    ///
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the payload, downcast to the owning subsystem's
    /// type, or `None` if `T` is not what was registered.
    ///
    pub fn data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::downcast(self.data.clone()).ok()
    }

    /// Prints a console line prefixed with the device's name, such
    /// as `pdisk0: `.
    ///
    pub fn printf(&self, args: core::fmt::Arguments<'_>) {
        crate::print!("{}{}: {}", self.devtype, self.id, args);
    }
}

// One bucket: the devices sharing a type tag, in registration
// order, and the id counter for the next arrival.
//
struct DeviceType {
    name: &'static str,
    next_id: AtomicUsize,
    devices: Vec<DeviceHandle>,
}

/// A directory of devices bucketed by type tag.
///
pub struct DeviceRegistry {
    types: Vec<DeviceType>,
}

impl DeviceRegistry {
    /// Returns an empty registry.
    ///
    pub const fn new() -> Self {
        DeviceRegistry { types: Vec::new() }
    }

    /// Registers a device under `devtype`, returning its handle.
    ///
    /// The assigned id is unique within the bucket and strictly
    /// increasing.
    ///
    pub fn register(
        &mut self,
        devtype: &'static str,
        data: Arc<dyn Any + Send + Sync>,
    ) -> DeviceHandle {
        let bucket = match self.bucket_index(devtype) {
            Some(index) => index,
            None => {
                self.types.push(DeviceType {
                    name: devtype,
                    next_id: AtomicUsize::new(0),
                    devices: Vec::new(),
                });
                self.types.len() - 1
            }
        };

        let bucket = &mut self.types[bucket];
        let id = bucket.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = DeviceHandle { devtype, id, data };
        bucket.devices.push(handle.clone());

        handle
    }

    /// Returns the devices registered under `devtype`, in
    /// registration order, or `None` if the type has never been
    /// seen.
    ///
    pub fn list_for(&self, devtype: &'static str) -> Option<Vec<DeviceHandle>> {
        let index = self.bucket_index(devtype)?;

        Some(self.types[index].devices.clone())
    }

    fn bucket_index(&self, devtype: &'static str) -> Option<usize> {
        // Type tags are interned statics, compared by identity.
        self.types
            .iter()
            .position(|bucket| core::ptr::eq(bucket.name, devtype))
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        DeviceRegistry::new()
    }
}

lazy_static! {
    /// The kernel's device registry.
    ///
    static ref REGISTRY: spin::Mutex<DeviceRegistry> = spin::Mutex::new(DeviceRegistry::new());
}

/// Registers a device with the kernel's registry.
///
pub fn register(devtype: &'static str, data: Arc<dyn Any + Send + Sync>) -> DeviceHandle {
    without_interrupts(|| REGISTRY.lock().register(devtype, data))
}

/// Lists the devices of one type in the kernel's registry.
///
pub fn list_for(devtype: &'static str) -> Option<Vec<DeviceHandle>> {
    without_interrupts(|| REGISTRY.lock().list_for(devtype))
}

// Grants subsystems that batch registry work (disk discovery) one
// lock for the whole batch.
//
pub(crate) fn registry() -> &'static spin::Mutex<DeviceRegistry> {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_TYPE_A: &str = "test-device-a";
    static TEST_TYPE_B: &str = "test-device-b";

    #[test]
    fn ids_are_per_bucket_and_increasing() {
        let mut registry = DeviceRegistry::new();
        let a0 = registry.register(TEST_TYPE_A, Arc::new(10u32));
        let a1 = registry.register(TEST_TYPE_A, Arc::new(11u32));
        let b0 = registry.register(TEST_TYPE_B, Arc::new("payload"));

        assert_eq!((a0.devtype(), a0.id()), (TEST_TYPE_A, 0));
        assert_eq!((a1.devtype(), a1.id()), (TEST_TYPE_A, 1));
        assert_eq!((b0.devtype(), b0.id()), (TEST_TYPE_B, 0));

        let listed = registry.list_for(TEST_TYPE_A).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id(), 0);
        assert_eq!(listed[1].id(), 1);

        assert!(registry.list_for("never-registered").is_none());
    }

    #[test]
    fn payloads_downcast_to_their_registered_type() {
        let mut registry = DeviceRegistry::new();
        let handle = registry.register(TEST_TYPE_A, Arc::new(0xabcdu32));

        assert_eq!(*handle.data::<u32>().unwrap(), 0xabcd);
        assert!(handle.data::<u64>().is_none());
    }
}
