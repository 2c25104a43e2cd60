//! Device manager facade
//!
//! Owns the shared state (registry, source, callback slot) and the monitor
//! thread. This is the only public entry point for init / terminate /
//! callback registration / property queries.

use crate::callback::{DeviceCallback, Dispatcher};
use crate::monitor::{MonitorHandle, MonitorState, spawn_monitor};
use crate::property::{PropertyResolver, resolve_devnode, resolve_property};
use crate::registry::Registry;
use crate::source::{DeviceSource, NativeDevice};
use crate::types::DeviceId;
use crate::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

/// Everything guarded by the manager lock
pub(crate) struct Inner<S: DeviceSource> {
    pub(crate) registry: Registry<S::Device>,
    pub(crate) source: S,
    pub(crate) dispatcher: Dispatcher,
}

/// State shared between the facade, resolvers and the monitor thread
pub(crate) struct Shared<S: DeviceSource> {
    inner: Mutex<Inner<S>>,
}

impl<S: DeviceSource> Shared<S> {
    /// Take the manager lock
    ///
    /// Not re-entrant. No path in this crate calls back into the manager
    /// while holding the guard; callbacks run after it is dropped.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hotplug-aware device manager
///
/// Construction wraps an already opened [`DeviceSource`]; dropping the
/// manager stops monitoring and releases every device handle.
pub struct DeviceManager<S: DeviceSource> {
    shared: Arc<Shared<S>>,
    /// Current monitor thread, if one has been started. Never held while
    /// joining a thread that may still run callbacks.
    monitor: Mutex<Option<MonitorHandle>>,
}

impl<S: DeviceSource> DeviceManager<S> {
    pub fn new(source: S) -> Self {
        info!("Creating new device manager");
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    registry: Registry::new(),
                    source,
                    dispatcher: Dispatcher::new(),
                }),
            }),
            monitor: Mutex::new(None),
        }
    }

    /// Enumerate attached devices and start monitoring
    ///
    /// Re-running replaces the registry contents with a fresh enumeration.
    /// A monitor that fails to start is logged and leaves the manager usable
    /// for queries against the enumerated devices.
    pub fn init(&self) -> Result<()> {
        info!("Initializing device manager");
        self.enumerate()?;

        let mut monitor = self.monitor_slot();
        match monitor.as_ref() {
            Some(running) if !running.is_finished() && is_live(running.state()) => {
                debug!("Monitor thread already running");
            }
            _ => {
                // A thread past Running (startup or monitoring failure) is
                // about to exit, so joining it here does not block.
                if let Some(finished) = monitor.take() {
                    finished.stop();
                }
                *monitor = Some(spawn_monitor(Arc::clone(&self.shared))?);
            }
        }

        info!("Done");
        Ok(())
    }

    /// Stop monitoring, clear every record and the callback
    ///
    /// Returns only after the monitor thread has ended, so no registry
    /// change or callback happens afterwards. A later [`init`](Self::init)
    /// starts over.
    pub fn terminate(&self) -> Result<()> {
        info!("Terminating device manager");

        let monitor = self.monitor_slot().take();
        if let Some(monitor) = monitor {
            info!("Stopping monitor thread");
            monitor.stop();
        }

        let mut inner = self.shared.lock();
        inner.registry.reset();
        inner.dispatcher.clear();

        info!("Done");
        Ok(())
    }

    /// Install the device callback and return the devices present now
    ///
    /// Both happen under the same lock acquisition: every device is either
    /// in the returned list or reported through the callback, never both.
    pub fn register_callback<F>(&self, callback: F) -> Vec<DeviceId>
    where
        F: Fn(DeviceId, bool) + Send + Sync + 'static,
    {
        self.register_shared_callback(Arc::new(callback))
    }

    /// [`register_callback`](Self::register_callback) for an already shared callback
    pub fn register_shared_callback(&self, callback: DeviceCallback) -> Vec<DeviceId> {
        let mut inner = self.shared.lock();
        inner.dispatcher.set(callback);
        let devices = inner.registry.snapshot_identifiers();
        info!("Callback registered, {} devices present", devices.len());
        devices
    }

    /// Remove the device callback; events keep updating the registry
    pub fn unregister_callback(&self) {
        self.shared.lock().dispatcher.clear();
        debug!("Callback cleared");
    }

    /// Read attribute `key` of device `id`
    pub fn get_property(&self, id: DeviceId, key: &str) -> Result<String> {
        resolve_property(&self.shared.lock().registry, id, key)
    }

    /// Device node path of device `id`
    pub fn device_node(&self, id: DeviceId) -> Result<String> {
        resolve_devnode(&self.shared.lock().registry, id)
    }

    /// Identifiers of all known devices, in the order they were added
    pub fn devices(&self) -> Vec<DeviceId> {
        self.shared.lock().registry.snapshot_identifiers()
    }

    /// Cloneable query handle that can be moved into a callback
    pub fn resolver(&self) -> PropertyResolver<S> {
        PropertyResolver::new(Arc::clone(&self.shared))
    }

    /// State of the current monitor thread; `Stopped` when there is none
    pub fn monitor_state(&self) -> MonitorState {
        self.monitor_slot()
            .as_ref()
            .map_or(MonitorState::Stopped, MonitorHandle::state)
    }

    pub fn is_monitoring(&self) -> bool {
        is_live(self.monitor_state())
    }

    fn enumerate(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        inner.registry.reset();

        let devices = inner.source.enumerate()?;
        for device in devices {
            match device.devnode() {
                Some(devnode) => {
                    inner.registry.add(device, devnode)?;
                }
                None => debug!("Skipping enumerated device without device node"),
            }
        }

        info!("Enumerated {} devices", inner.registry.len());
        Ok(())
    }

    fn monitor_slot(&self) -> MutexGuard<'_, Option<MonitorHandle>> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared<S> {
        &self.shared
    }
}

fn is_live(state: MonitorState) -> bool {
    matches!(state, MonitorState::Starting | MonitorState::Running)
}

impl<S: DeviceSource> Drop for DeviceManager<S> {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            error!("Failed to terminate device manager: {}", e);
        }
        info!("Destroyed device manager");
    }
}
