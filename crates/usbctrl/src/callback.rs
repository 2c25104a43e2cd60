//! Callback dispatcher
//!
//! Holds the one registered device callback. The slot lives inside the
//! manager lock; invocation happens on the monitor thread after the lock
//! has been released, so a callback may query the manager again.

use crate::types::DeviceId;
use std::sync::Arc;
use tracing::error;

/// Device change callback: `(identifier, connected)`
///
/// Whatever the closure captures plays the role of the caller's payload.
/// Runs on the monitor thread; a slow callback delays the processing of the
/// next device event.
pub type DeviceCallback = Arc<dyn Fn(DeviceId, bool) + Send + Sync + 'static>;

/// Single-slot callback holder
#[derive(Default)]
pub struct Dispatcher {
    callback: Option<DeviceCallback>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `callback`, replacing any previous one
    pub fn set(&mut self, callback: DeviceCallback) {
        self.callback = Some(callback);
    }

    pub fn clear(&mut self) {
        self.callback = None;
    }

    pub fn is_registered(&self) -> bool {
        self.callback.is_some()
    }

    /// Clone of the current callback, to be invoked once the lock is gone
    pub fn current(&self) -> Option<DeviceCallback> {
        self.callback.clone()
    }
}

/// Invoke `callback`, containing any panic it raises
pub fn invoke(callback: &DeviceCallback, id: DeviceId, connected: bool) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(id, connected)));

    if let Err(e) = result {
        error!(
            "Panic in device callback for device {} (connected={}): {:?}",
            id, connected, e
        );
    }
}
