//! Property resolver
//!
//! Maps `(identifier, property name)` to the attribute value the
//! notification subsystem reports for that device. The registry is consulted
//! under the manager lock and the value is copied out before the lock is
//! released; nothing returned here borrows from the subsystem.

use crate::manager::Shared;
use crate::registry::Registry;
use crate::source::{DeviceSource, NativeDevice};
use crate::types::DeviceId;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Property names surfaced to callers
///
/// Informational only; [`resolve_property`] passes any name through to the
/// attribute store.
pub const SUPPORTED_PROPERTIES: [&str; 7] = [
    "manufacturer",
    "product",
    "idProduct",
    "idVendor",
    "serial",
    "bInterfaceClass",
    "bInterfaceSubClass",
];

pub fn is_supported_property(key: &str) -> bool {
    SUPPORTED_PROPERTIES.contains(&key)
}

/// Look up `key` on device `id`; caller must hold the manager lock
pub(crate) fn resolve_property<D: NativeDevice>(
    registry: &Registry<D>,
    id: DeviceId,
    key: &str,
) -> Result<String> {
    let device = registry.find(id).ok_or(Error::DeviceNotFound(id))?;
    debug!("Found record for device {}, querying '{}'", id, key);

    device.attribute(key).ok_or_else(|| Error::PropertyNotFound {
        id,
        key: key.to_string(),
    })
}

pub(crate) fn resolve_devnode<D>(registry: &Registry<D>, id: DeviceId) -> Result<String> {
    registry
        .record(id)
        .map(|record| record.devnode().to_string())
        .ok_or(Error::DeviceNotFound(id))
}

/// Cloneable, query-only view of a [`DeviceManager`](crate::DeviceManager)
///
/// Meant to be captured by the device callback, which runs on the monitor
/// thread without the manager lock held. It keeps the shared state alive;
/// `terminate` (or dropping the manager) clears the callback and with it any
/// resolver the callback captured.
pub struct PropertyResolver<S: DeviceSource> {
    shared: Arc<Shared<S>>,
}

impl<S: DeviceSource> Clone for PropertyResolver<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: DeviceSource> PropertyResolver<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    pub fn get_property(&self, id: DeviceId, key: &str) -> Result<String> {
        resolve_property(&self.shared.lock().registry, id, key)
    }

    pub fn device_node(&self, id: DeviceId) -> Result<String> {
        resolve_devnode(&self.shared.lock().registry, id)
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        self.shared.lock().registry.snapshot_identifiers()
    }
}
