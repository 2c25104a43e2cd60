//! Hotplug-aware USB device registry
//!
//! `usbctrl` discovers the USB devices currently attached to the host, keeps a
//! registry of them while they come and go, notifies a single registered
//! callback about arrivals and removals, and answers property queries
//! (`idVendor`, `product`, ...) against live device records.
//!
//! The moving parts:
//! - [`DeviceManager`]: the facade. `init` enumerates and starts monitoring,
//!   `terminate` stops monitoring and clears all state.
//! - A background monitor thread that waits on the device-notification
//!   descriptor and an internal control pipe, applies events to the registry
//!   and then invokes the callback without holding any lock.
//! - [`DeviceSource`]: the narrow interface to the platform notification
//!   subsystem. [`UdevSource`] is the libudev implementation, [`mock`]
//!   provides an in-memory one for tests.
//!
//! # Example
//!
//! ```no_run
//! use usbctrl::{DeviceFilter, DeviceManager};
//!
//! # fn main() -> usbctrl::Result<()> {
//! let manager = DeviceManager::open(&DeviceFilter::default())?;
//! manager.init()?;
//!
//! let resolver = manager.resolver();
//! let present = manager.register_callback(move |id, connected| {
//!     if connected {
//!         let product = resolver.get_property(id, "product").ok();
//!         println!("device {} connected: {:?}", id, product);
//!     } else {
//!         println!("device {} removed", id);
//!     }
//! });
//! println!("{} devices already present", present.len());
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod callback;
pub mod control;
pub mod error;
#[cfg(target_os = "linux")]
pub mod ffi;
pub mod manager;
pub mod mock;
pub mod monitor;
pub mod property;
pub mod record;
pub mod registry;
pub mod source;
pub mod types;

pub use bridge::{HotplugEvent, event_bridge};
pub use callback::DeviceCallback;
pub use error::{Error, Result};
pub use manager::DeviceManager;
pub use monitor::MonitorState;
pub use property::{PropertyResolver, SUPPORTED_PROPERTIES, is_supported_property};
pub use record::DeviceRecord;
pub use registry::Registry;
pub use source::{DeviceFilter, DeviceSource, EventAction, NativeDevice, SourceEvent};
pub use types::DeviceId;

#[cfg(target_os = "linux")]
pub use source::udev::{UdevDevice, UdevListener, UdevSource};
