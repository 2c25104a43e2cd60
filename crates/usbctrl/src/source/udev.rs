//! libudev backed device source
//!
//! Enumerates and monitors devices through the `udev` crate. libudev objects
//! are not thread-safe; the manager only touches them with its lock held,
//! which is what makes the `Send` implementations below sound.

use super::{DeviceFilter, DeviceSource, EventAction, NativeDevice, SourceEvent};
use crate::{DeviceManager, Error, Result};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use tracing::{debug, info, warn};

/// Owned reference to a `udev_device`, unreffed on drop
pub struct UdevDevice(udev::Device);

// SAFETY: a UdevDevice is only created, queried and dropped while the
// manager lock is held (or by the sole owner of the manager state), so
// libudev never sees concurrent access to it or to its context.
unsafe impl Send for UdevDevice {}

impl UdevDevice {
    /// sysfs path of the device
    pub fn syspath(&self) -> String {
        self.0.syspath().to_string_lossy().into_owned()
    }
}

impl NativeDevice for UdevDevice {
    fn devnode(&self) -> Option<String> {
        self.0
            .devnode()
            .map(|path| path.to_string_lossy().into_owned())
    }

    fn attribute(&self, key: &str) -> Option<String> {
        self.0
            .attribute_value(key)
            .map(|value| value.to_string_lossy().into_owned())
    }
}

/// Netlink monitor socket owned by one monitor thread
pub struct UdevListener(udev::MonitorSocket);

// SAFETY: the monitor thread only polls the raw descriptor without the
// manager lock; receiving from and dropping the socket (which touches its
// libudev context) happen with the lock held.
unsafe impl Send for UdevListener {}

impl AsFd for UdevListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the socket owns the descriptor and keeps it open for as
        // long as `self` is borrowed.
        unsafe { BorrowedFd::borrow_raw(self.0.as_raw_fd()) }
    }
}

/// libudev context and the device class to match
pub struct UdevSource {
    udev: udev::Udev,
    filter: DeviceFilter,
}

// SAFETY: see UdevDevice; every method runs under the manager lock.
unsafe impl Send for UdevSource {}

impl UdevSource {
    /// Open a libudev context
    pub fn new(filter: DeviceFilter) -> Result<Self> {
        let udev = udev::Udev::new()
            .map_err(|e| Error::StartupFailure(format!("udev context unavailable: {}", e)))?;

        info!(
            "Opened udev context (subsystem={}, devtype={})",
            filter.subsystem,
            filter.devtype.as_deref().unwrap_or("*")
        );

        Ok(Self { udev, filter })
    }
}

impl DeviceSource for UdevSource {
    type Device = UdevDevice;
    type Listener = UdevListener;

    fn enumerate(&mut self) -> Result<Vec<UdevDevice>> {
        let mut enumerator = udev::Enumerator::with_udev(self.udev.clone())?;
        enumerator.match_subsystem(&self.filter.subsystem)?;
        if let Some(devtype) = &self.filter.devtype {
            enumerator.match_property("DEVTYPE", devtype)?;
        }

        let devices: Vec<UdevDevice> = enumerator.scan_devices()?.map(UdevDevice).collect();

        for device in &devices {
            debug!(
                "Detected device [syspath: {}, devnode: {}]",
                device.syspath(),
                device.devnode().as_deref().unwrap_or("-")
            );
        }

        Ok(devices)
    }

    fn start_listening(&mut self) -> Result<UdevListener> {
        let builder = udev::MonitorBuilder::new()
            .map_err(|e| Error::StartupFailure(format!("could not create monitor: {}", e)))?;

        let builder = match &self.filter.devtype {
            Some(devtype) => builder.match_subsystem_devtype(&self.filter.subsystem, devtype),
            None => builder.match_subsystem(&self.filter.subsystem),
        }
        .map_err(|e| Error::StartupFailure(format!("could not add monitor filter: {}", e)))?;

        let socket = builder
            .listen()
            .map_err(|e| Error::StartupFailure(format!("could not enable monitoring: {}", e)))?;

        debug!("udev monitor listening on fd {}", socket.as_raw_fd());
        Ok(UdevListener(socket))
    }

    fn receive_event(&mut self, listener: &UdevListener) -> Option<SourceEvent<UdevDevice>> {
        let event = listener.0.iter().next()?;

        let action = event
            .action()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();
        if action.is_empty() {
            warn!("udev event without action for {}", event.syspath().display());
        }

        Some(SourceEvent {
            action: EventAction::from_action(&action),
            device: UdevDevice(event.device()),
        })
    }
}

impl DeviceManager<UdevSource> {
    /// Open libudev and build a manager for the given device class
    pub fn open(filter: &DeviceFilter) -> Result<Self> {
        Ok(DeviceManager::new(UdevSource::new(filter.clone())?))
    }
}
