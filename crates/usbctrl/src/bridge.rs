//! Async channel bridge from the monitor thread to an async runtime
//!
//! The device callback runs on the blocking monitor thread. [`event_bridge`]
//! builds a callback that forwards every notification into a bounded
//! `async_channel`, so a Tokio task can `recv().await` them.

use crate::callback::DeviceCallback;
use crate::types::DeviceId;
use async_channel::{Receiver, bounded};
use std::sync::Arc;
use tracing::error;

/// Device arrival or removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotplugEvent {
    pub id: DeviceId,
    pub connected: bool,
}

/// Create a forwarding callback and the receiving end of its channel
///
/// When the channel is full the callback blocks the monitor thread until
/// the receiver catches up. Once the receiver is dropped, events are
/// discarded with an error log.
pub fn event_bridge(capacity: usize) -> (DeviceCallback, Receiver<HotplugEvent>) {
    let (tx, rx) = bounded(capacity);

    let callback: DeviceCallback = Arc::new(move |id: DeviceId, connected: bool| {
        if let Err(e) = tx.send_blocking(HotplugEvent { id, connected }) {
            error!("Failed to forward device event: {}", e);
        }
    });

    (callback, rx)
}
