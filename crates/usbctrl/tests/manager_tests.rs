//! Device manager integration tests
//!
//! Drives a [`DeviceManager`] with a running monitor thread through the mock
//! device source.
//!
//! # Test Scenarios
//! - Enumeration order and identifier assignment
//! - Live attach/detach notifications
//! - Callback registration snapshot
//! - Shutdown barrier on terminate
//! - Re-entrant queries from the callback
//! - Restarting the manager from inside the callback
//! - Monitor startup failure
//!
//! Run with: `cargo test -p usbctrl --test manager_tests`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use usbctrl::mock::{MockController, MockDeviceSpec, MockSource, mock_source};
use usbctrl::{DeviceId, DeviceManager, Error, EventAction, MonitorState};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

fn node(n: u8) -> String {
    format!("/dev/bus/usb/001/{:03}", n)
}

fn manager_with(devices: &[MockDeviceSpec]) -> (DeviceManager<MockSource>, MockController) {
    let (source, controller) = mock_source().expect("Failed to create mock source");
    for device in devices {
        controller.plug(device.clone());
    }
    let manager = DeviceManager::new(source);
    manager.init().expect("init failed");
    (manager, controller)
}

fn subscribe(manager: &DeviceManager<MockSource>) -> (Vec<DeviceId>, Receiver<(DeviceId, bool)>) {
    let (tx, rx) = channel();
    let tx = Mutex::new(tx);
    let present = manager.register_callback(move |id, connected| {
        let _ = tx.lock().unwrap().send((id, connected));
    });
    (present, rx)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ============================================================================
// Enumeration
// ============================================================================

#[test]
fn test_enumeration_assigns_identifiers_in_order() {
    let (manager, _controller) = manager_with(&[MockDeviceSpec::new(node(2)), MockDeviceSpec::new(node(3))]);

    assert_eq!(manager.devices(), vec![DeviceId(1), DeviceId(2)]);
    assert_eq!(manager.device_node(DeviceId(1)).unwrap(), node(2));
    assert_eq!(manager.device_node(DeviceId(2)).unwrap(), node(3));
}

#[test]
fn test_register_callback_returns_snapshot_without_notifications() {
    let (manager, _controller) = manager_with(&[
        MockDeviceSpec::new(node(2)),
        MockDeviceSpec::new(node(3)),
        MockDeviceSpec::new(node(4)),
    ]);

    let (present, rx) = subscribe(&manager);

    assert_eq!(present, vec![DeviceId(1), DeviceId(2), DeviceId(3)]);
    assert!(rx.recv_timeout(QUIET_PERIOD).is_err());
}

// ============================================================================
// Live events
// ============================================================================

#[test]
fn test_remove_event_for_enumerated_device() {
    let (manager, controller) = manager_with(&[MockDeviceSpec::new(node(2)), MockDeviceSpec::new(node(3))]);
    let (_, rx) = subscribe(&manager);

    controller.detach(&node(2)).unwrap();

    assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(1), false));
    assert_eq!(manager.devices(), vec![DeviceId(2)]);
    assert_eq!(controller.live_handles(), 1);
}

#[test]
fn test_attach_then_detach_notifies_both() {
    let (manager, controller) = manager_with(&[]);
    let (present, rx) = subscribe(&manager);
    assert!(present.is_empty());

    controller
        .attach(MockDeviceSpec::new(node(7)).with_attribute("product", "Keyboard"))
        .unwrap();
    assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(1), true));
    assert_eq!(manager.get_property(DeviceId(1), "product").unwrap(), "Keyboard");

    controller.detach(&node(7)).unwrap();
    assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(1), false));
    assert!(manager.devices().is_empty());
    assert_eq!(controller.live_handles(), 0);
}

#[test]
fn test_replug_gets_new_identifier() {
    let (manager, controller) = manager_with(&[MockDeviceSpec::new(node(2))]);
    let (_, rx) = subscribe(&manager);

    controller.detach(&node(2)).unwrap();
    controller.attach(MockDeviceSpec::new(node(2))).unwrap();

    assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(1), false));
    assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(2), true));
    assert_eq!(manager.devices(), vec![DeviceId(2)]);
}

#[test]
fn test_remove_with_prefix_path_is_ignored() {
    let (manager, controller) = manager_with(&[MockDeviceSpec::new("/dev/bus/usb/001/002")]);
    let (_, rx) = subscribe(&manager);

    controller.detach("/dev/bus/usb/001/00").unwrap();

    assert!(rx.recv_timeout(QUIET_PERIOD).is_err());
    assert_eq!(manager.devices(), vec![DeviceId(1)]);
}

#[test]
fn test_change_events_are_ignored() {
    let (manager, controller) = manager_with(&[MockDeviceSpec::new(node(2))]);
    let (_, rx) = subscribe(&manager);

    controller
        .send_event(EventAction::Other("change".to_string()), MockDeviceSpec::new(node(2)))
        .unwrap();
    // Events are handled in order; the attach notification proves the
    // change event has been fully processed
    controller.attach(MockDeviceSpec::new(node(3))).unwrap();

    assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(2), true));
    assert_eq!(manager.devices(), vec![DeviceId(1), DeviceId(2)]);
    assert_eq!(controller.live_handles(), 2);
}

#[test]
fn test_events_without_callback_still_update_registry() {
    let (manager, controller) = manager_with(&[]);

    controller.attach(MockDeviceSpec::new(node(5))).unwrap();

    wait_until(|| manager.devices() == vec![DeviceId(1)]);
}

#[test]
fn test_callback_can_query_manager() {
    let (manager, controller) = manager_with(&[]);
    let resolver = manager.resolver();
    let products = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&products);
    manager.register_callback(move |id, connected| {
        if connected {
            let product = resolver.get_property(id, "product").ok();
            sink.lock().unwrap().push((id, product));
        }
    });

    controller
        .attach(MockDeviceSpec::new(node(9)).with_attribute("product", "Webcam"))
        .unwrap();

    wait_until(|| !products.lock().unwrap().is_empty());
    assert_eq!(
        *products.lock().unwrap(),
        vec![(DeviceId(1), Some("Webcam".to_string()))]
    );
}

#[test]
fn test_panicking_callback_does_not_stop_monitoring() {
    let (manager, controller) = manager_with(&[]);
    manager.register_callback(|_, _| panic!("callback failure"));

    controller.attach(MockDeviceSpec::new(node(2))).unwrap();
    wait_until(|| manager.devices().len() == 1);

    let (_, rx) = subscribe(&manager);
    controller.attach(MockDeviceSpec::new(node(3))).unwrap();
    assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(2), true));
    assert_eq!(manager.monitor_state(), MonitorState::Running);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_get_property_value() {
    let (manager, _controller) = manager_with(&[
        MockDeviceSpec::new(node(2)),
        MockDeviceSpec::new(node(3)).with_attribute("idVendor", "0x046d"),
    ]);

    assert_eq!(manager.get_property(DeviceId(2), "idVendor").unwrap(), "0x046d");
}

#[test]
fn test_get_property_not_found() {
    let (manager, controller) = manager_with(&[MockDeviceSpec::new(node(2))]);
    let handles = controller.live_handles();

    assert!(matches!(
        manager.get_property(DeviceId(2), "idVendor"),
        Err(Error::DeviceNotFound(DeviceId(2)))
    ));
    assert!(matches!(
        manager.get_property(DeviceId(1), "serial"),
        Err(Error::PropertyNotFound { .. })
    ));
    assert_eq!(controller.live_handles(), handles);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_monitor_reaches_running() {
    let (manager, controller) = manager_with(&[]);
    wait_until(|| manager.monitor_state() == MonitorState::Running);
    assert!(manager.is_monitoring());
    assert!(controller.is_listening());
}

#[test]
fn test_no_callback_after_terminate() {
    let (manager, controller) = manager_with(&[]);
    let (_, rx) = subscribe(&manager);

    for n in 0..5 {
        controller.attach(MockDeviceSpec::new(node(n))).unwrap();
    }
    manager.terminate().unwrap();
    let _ = rx.try_iter().count();

    controller.attach(MockDeviceSpec::new(node(42))).unwrap();
    assert!(rx.recv_timeout(QUIET_PERIOD).is_err());
    assert!(manager.devices().is_empty());
    assert_eq!(manager.monitor_state(), MonitorState::Stopped);
    assert!(!controller.is_listening());
}

#[test]
fn test_terminate_waits_for_running_callback() {
    let (source, controller) = mock_source().unwrap();
    let manager = Arc::new(DeviceManager::new(source));
    manager.init().unwrap();

    let (entered_tx, entered_rx) = channel();
    let (release_tx, release_rx) = channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let calls = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let (counter, done) = (Arc::clone(&calls), Arc::clone(&finished));
    manager.register_callback(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = entered_tx.lock().unwrap().send(());
        let _ = release_rx.lock().unwrap().recv();
        done.store(true, Ordering::SeqCst);
    });

    controller.attach(MockDeviceSpec::new(node(2))).unwrap();
    entered_rx.recv_timeout(TEST_TIMEOUT).unwrap();

    let terminating = Arc::clone(&manager);
    let done = Arc::clone(&finished);
    let terminator = std::thread::spawn(move || {
        terminating.terminate().unwrap();
        done.load(Ordering::SeqCst)
    });

    // Blocked on the monitor thread, which is blocked in the callback
    std::thread::sleep(QUIET_PERIOD);
    assert!(!terminator.is_finished());

    release_tx.send(()).unwrap();
    assert!(terminator.join().unwrap(), "terminate returned before the callback finished");

    controller.attach(MockDeviceSpec::new(node(3))).unwrap();
    std::thread::sleep(QUIET_PERIOD);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.monitor_state(), MonitorState::Stopped);
}

#[test]
fn test_reinit_from_callback_keeps_new_monitor() {
    let (source, controller) = mock_source().unwrap();
    let manager = Arc::new(DeviceManager::new(source));
    manager.init().unwrap();

    let (tx, rx) = channel();
    let tx = Mutex::new(tx);
    let weak = Arc::downgrade(&manager);
    manager.register_callback(move |_, _| {
        if let Some(manager) = weak.upgrade() {
            let restarted = manager.terminate().and_then(|()| manager.init());
            let _ = tx.lock().unwrap().send(restarted.is_ok());
        }
    });

    controller.attach(MockDeviceSpec::new(node(2))).unwrap();
    assert!(rx.recv_timeout(TEST_TIMEOUT).unwrap());

    // The previous monitor thread exits once the callback has returned; it
    // must leave the new thread's state and listener alone
    wait_until(|| manager.monitor_state() == MonitorState::Running);
    std::thread::sleep(QUIET_PERIOD);
    assert_eq!(controller.listeners(), 1);
    assert_eq!(manager.monitor_state(), MonitorState::Running);
    assert!(manager.is_monitoring());

    let (present, events) = subscribe(&manager);
    assert_eq!(present, vec![DeviceId(2)]);
    controller.attach(MockDeviceSpec::new(node(3))).unwrap();
    assert_eq!(events.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(3), true));

    // A second init sees the new thread as running and leaves it alone
    manager.init().unwrap();
    assert_eq!(controller.listeners(), 1);
}

#[test]
fn test_init_after_terminate_restarts_monitoring() {
    let (manager, controller) = manager_with(&[MockDeviceSpec::new(node(2))]);
    manager.terminate().unwrap();

    manager.init().unwrap();
    assert_eq!(manager.devices(), vec![DeviceId(2)]);

    let (_, rx) = subscribe(&manager);
    controller.attach(MockDeviceSpec::new(node(3))).unwrap();
    assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), (DeviceId(3), true));
}

#[test]
fn test_startup_failure_keeps_enumerated_devices() {
    let (source, controller) = mock_source().unwrap();
    controller.plug(MockDeviceSpec::new(node(2)).with_attribute("product", "Hub"));
    controller.set_listen_failure(true);

    let manager = DeviceManager::new(source);
    manager.init().expect("startup failure must not fail init");

    wait_until(|| manager.monitor_state() == MonitorState::Stopped);
    assert_eq!(manager.get_property(DeviceId(1), "product").unwrap(), "Hub");

    // A later init retries monitoring
    controller.set_listen_failure(false);
    manager.init().unwrap();
    wait_until(|| manager.monitor_state() == MonitorState::Running);
}

#[test]
fn test_terminate_from_callback_does_not_deadlock() {
    let (source, controller) = mock_source().unwrap();
    let manager = Arc::new(DeviceManager::new(source));
    manager.init().unwrap();

    let (tx, rx) = channel();
    let tx = Mutex::new(tx);
    let weak = Arc::downgrade(&manager);
    manager.register_callback(move |_, _| {
        if let Some(manager) = weak.upgrade() {
            let _ = tx.lock().unwrap().send(manager.terminate().is_ok());
        }
    });

    controller.attach(MockDeviceSpec::new(node(2))).unwrap();
    assert!(rx.recv_timeout(TEST_TIMEOUT).unwrap());
    wait_until(|| manager.monitor_state() == MonitorState::Stopped);
    assert!(manager.devices().is_empty());
}

#[test]
fn test_drop_releases_all_handles() {
    let (manager, controller) = manager_with(&[MockDeviceSpec::new(node(2)), MockDeviceSpec::new(node(3))]);
    controller.attach(MockDeviceSpec::new(node(4))).unwrap();
    wait_until(|| manager.devices().len() == 3);

    drop(manager);
    assert_eq!(controller.live_handles(), 0);
    assert!(!controller.is_listening());
}
