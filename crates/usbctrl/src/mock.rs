//! In-memory device source for tests
//!
//! [`mock_source`] returns a [`MockSource`] to hand to a
//! [`DeviceManager`](crate::DeviceManager) and a [`MockController`] that
//! stays with the test: it plugs devices in before enumeration, injects live
//! events (waking the monitor's `poll` through a pipe) and counts the device
//! handles and listeners that are still alive.
//!
//! # Example
//!
//! ```
//! use usbctrl::DeviceManager;
//! use usbctrl::mock::{MockDeviceSpec, mock_source};
//!
//! let (source, controller) = mock_source().unwrap();
//! controller.plug(MockDeviceSpec::new("/dev/bus/usb/001/002").with_attribute("idVendor", "0x046d"));
//!
//! let manager = DeviceManager::new(source);
//! manager.init().unwrap();
//! assert_eq!(manager.devices().len(), 1);
//! ```

use crate::source::{DeviceSource, EventAction, NativeDevice, SourceEvent};
use crate::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Description of a mock device; realized into a [`MockDevice`] handle when
/// enumerated or delivered with an event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockDeviceSpec {
    pub devnode: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl MockDeviceSpec {
    pub fn new(devnode: impl Into<String>) -> Self {
        Self {
            devnode: Some(devnode.into()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn without_devnode() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Mock native handle; counted while alive
#[derive(Debug)]
pub struct MockDevice {
    spec: MockDeviceSpec,
    live: Arc<AtomicUsize>,
}

impl MockDevice {
    fn new(spec: MockDeviceSpec, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            spec,
            live: Arc::clone(live),
        }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NativeDevice for MockDevice {
    fn devnode(&self) -> Option<String> {
        self.spec.devnode.clone()
    }

    fn attribute(&self, key: &str) -> Option<String> {
        self.spec.attributes.get(key).cloned()
    }
}

#[derive(Default)]
struct MockState {
    present: Vec<MockDeviceSpec>,
    pending: VecDeque<(EventAction, MockDeviceSpec)>,
    listen_failure: bool,
    listeners: usize,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Source half, owned by the manager
pub struct MockSource {
    state: Arc<Mutex<MockState>>,
    live: Arc<AtomicUsize>,
    wake_rx: File,
}

/// Test half, drives the source
pub struct MockController {
    state: Arc<Mutex<MockState>>,
    live: Arc<AtomicUsize>,
    wake_tx: Mutex<Option<File>>,
}

/// Read end of the wake pipe, one per monitor thread
pub struct MockListener {
    events: File,
    state: Arc<Mutex<MockState>>,
}

impl AsFd for MockListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.events.as_fd()
    }
}

impl Drop for MockListener {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.listeners = state.listeners.saturating_sub(1);
    }
}

/// Create a connected source/controller pair
pub fn mock_source() -> Result<(MockSource, MockController)> {
    let (rx, tx) = nix::unistd::pipe()?;
    let state = Arc::new(Mutex::new(MockState::default()));
    let live = Arc::new(AtomicUsize::new(0));

    Ok((
        MockSource {
            state: Arc::clone(&state),
            live: Arc::clone(&live),
            wake_rx: File::from(rx),
        },
        MockController {
            state,
            live,
            wake_tx: Mutex::new(Some(File::from(tx))),
        },
    ))
}

impl MockController {
    /// Make a device present for enumeration without emitting an event
    pub fn plug(&self, spec: MockDeviceSpec) {
        lock(&self.state).present.push(spec);
    }

    /// Device arrives: present from now on, plus a live `add` event
    pub fn attach(&self, spec: MockDeviceSpec) -> Result<()> {
        lock(&self.state).present.push(spec.clone());
        self.send_event(EventAction::Add, spec)
    }

    /// Device leaves: no longer present, plus a live `remove` event
    pub fn detach(&self, devnode: &str) -> Result<()> {
        lock(&self.state)
            .present
            .retain(|spec| spec.devnode.as_deref() != Some(devnode));
        self.send_event(EventAction::Remove, MockDeviceSpec::new(devnode))
    }

    /// Queue a raw live event and wake the monitor
    pub fn send_event(&self, action: EventAction, spec: MockDeviceSpec) -> Result<()> {
        let guard = self.wake_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut wake_tx) = guard.as_ref() else {
            return Err(Error::Io(std::io::ErrorKind::BrokenPipe.into()));
        };
        lock(&self.state).pending.push_back((action, spec));
        wake_tx.write_all(&[1])?;
        Ok(())
    }

    /// Close the write end of the wake pipe; listeners then report a hang-up
    pub fn hang_up(&self) {
        self.wake_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Make `start_listening` fail, as if the subsystem had no monitor
    pub fn set_listen_failure(&self, fail: bool) {
        lock(&self.state).listen_failure = fail;
    }

    pub fn is_listening(&self) -> bool {
        self.listeners() > 0
    }

    /// Listeners handed out and not yet dropped
    pub fn listeners(&self) -> usize {
        lock(&self.state).listeners
    }

    /// Number of device handles not yet released
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Events queued but not yet received by the source
    pub fn pending_events(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

impl DeviceSource for MockSource {
    type Device = MockDevice;
    type Listener = MockListener;

    fn enumerate(&mut self) -> Result<Vec<MockDevice>> {
        let present = lock(&self.state).present.clone();
        Ok(present
            .into_iter()
            .map(|spec| MockDevice::new(spec, &self.live))
            .collect())
    }

    fn start_listening(&mut self) -> Result<MockListener> {
        let mut state = lock(&self.state);
        if state.listen_failure {
            return Err(Error::StartupFailure("mock monitor unavailable".to_string()));
        }
        let events = self.wake_rx.try_clone()?;
        state.listeners += 1;
        Ok(MockListener {
            events,
            state: Arc::clone(&self.state),
        })
    }

    fn receive_event(&mut self, listener: &MockListener) -> Option<SourceEvent<MockDevice>> {
        // One wake byte per queued event
        let mut byte = [0u8; 1];
        match (&listener.events).read(&mut byte) {
            Ok(1) => {}
            _ => return None,
        }

        // Realized under the state lock so pending_events() and
        // live_handles() never observe the event in between
        let mut state = lock(&self.state);
        let (action, spec) = state.pending.pop_front()?;
        Some(SourceEvent {
            action,
            device: MockDevice::new(spec, &self.live),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_realizes_present_devices() {
        let (mut source, controller) = mock_source().unwrap();
        controller.plug(MockDeviceSpec::new("/dev/bus/usb/001/002").with_attribute("product", "Mouse"));

        let devices = source.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].attribute("product").as_deref(), Some("Mouse"));
        assert_eq!(controller.live_handles(), 1);

        drop(devices);
        assert_eq!(controller.live_handles(), 0);
    }

    #[test]
    fn test_events_are_received_in_order() {
        let (mut source, controller) = mock_source().unwrap();
        controller.attach(MockDeviceSpec::new("/dev/bus/usb/001/002")).unwrap();
        controller.detach("/dev/bus/usb/001/002").unwrap();
        assert_eq!(controller.pending_events(), 2);

        let listener = source.start_listening().unwrap();
        let first = source.receive_event(&listener).unwrap();
        assert_eq!(first.action, EventAction::Add);
        let second = source.receive_event(&listener).unwrap();
        assert_eq!(second.action, EventAction::Remove);
        assert_eq!(second.device.devnode().as_deref(), Some("/dev/bus/usb/001/002"));
        assert_eq!(controller.pending_events(), 0);

        // Detached device is no longer enumerated
        assert!(source.enumerate().unwrap().is_empty());
    }

    #[test]
    fn test_listen_failure() {
        let (mut source, controller) = mock_source().unwrap();
        controller.set_listen_failure(true);
        assert!(matches!(
            source.start_listening(),
            Err(Error::StartupFailure(_))
        ));
        assert!(!controller.is_listening());

        controller.set_listen_failure(false);
        let first = source.start_listening().unwrap();
        let second = source.start_listening().unwrap();
        assert_eq!(controller.listeners(), 2);

        drop(first);
        assert!(controller.is_listening());
        drop(second);
        assert!(!controller.is_listening());
    }

    #[test]
    fn test_send_after_hang_up_fails() {
        let (_source, controller) = mock_source().unwrap();
        controller.hang_up();
        assert!(matches!(
            controller.send_event(EventAction::Add, MockDeviceSpec::new("/dev/bus/usb/001/002")),
            Err(Error::Io(_))
        ));
        assert_eq!(controller.pending_events(), 0);
    }
}
