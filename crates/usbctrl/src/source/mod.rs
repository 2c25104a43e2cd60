//! Device-notification subsystem interface
//!
//! The manager consumes the platform subsystem through [`DeviceSource`] only:
//! enumerate present devices, open a pollable live-event listener and pull
//! one event at a time from it. Device handles implement [`NativeDevice`];
//! releasing a handle is dropping it, and the same goes for listeners.

use crate::Result;
use std::os::fd::AsFd;

#[cfg(target_os = "linux")]
pub mod udev;

/// Handle to one device object owned by the notification subsystem
pub trait NativeDevice: Send {
    /// OS device node path, e.g. `/dev/bus/usb/001/002`
    fn devnode(&self) -> Option<String>;

    /// Named attribute of the device (`idVendor`, `product`, ...)
    fn attribute(&self, key: &str) -> Option<String>;
}

/// Classification of a live device event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Add,
    Remove,
    /// Any other action (`change`, `bind`, `unbind`, ...)
    Other(String),
}

impl EventAction {
    /// Classify a raw action string; only exact `add` and `remove` match
    pub fn from_action(action: &str) -> Self {
        match action {
            "add" => EventAction::Add,
            "remove" => EventAction::Remove,
            other => EventAction::Other(other.to_string()),
        }
    }
}

/// One event pulled from the live-event monitor
#[derive(Debug)]
pub struct SourceEvent<D> {
    pub action: EventAction,
    /// Handle for the device the event is about. Ownership moves to the
    /// registry for `Add`; for everything else it is dropped by the monitor.
    pub device: D,
}

/// Device class the source enumerates and monitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Kernel subsystem, `usb` for USB devices
    pub subsystem: String,
    /// Device type within the subsystem; `usb_device` excludes interfaces
    pub devtype: Option<String>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            subsystem: "usb".to_string(),
            devtype: Some("usb_device".to_string()),
        }
    }
}

/// Platform device-notification subsystem
///
/// All methods are called with the manager lock held, so implementations
/// never see concurrent calls and their handles are never touched from two
/// threads at once.
pub trait DeviceSource: Send + 'static {
    type Device: NativeDevice + 'static;

    /// Live-event monitor owned by one monitor thread
    ///
    /// Each call to [`DeviceSource::start_listening`] yields an independent
    /// listener; dropping it (with the manager lock held) closes it.
    type Listener: AsFd + Send + 'static;

    /// Devices of the configured class that are present right now
    fn enumerate(&mut self) -> Result<Vec<Self::Device>>;

    /// Create a live-event listener filtered to the device class
    fn start_listening(&mut self) -> Result<Self::Listener>;

    /// Pull one pending event from `listener`, `None` if nothing could be
    /// received
    fn receive_event(&mut self, listener: &Self::Listener) -> Option<SourceEvent<Self::Device>>;
}
