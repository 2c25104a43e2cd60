//! Monitor loop
//!
//! Background thread that waits on the control channel and on a live-event
//! listener of its own, applies device events to the registry and then
//! notifies the registered callback.
//!
//! ```text
//! Starting ──(listener unavailable)────────────────────────┐
//!    │                                                     ▼
//!    └──► Running ──(control closed / poll failure)──► Draining ──► Stopped
//! ```

use crate::callback::{self, DeviceCallback};
use crate::control::{ShutdownSignal, ShutdownWaiter, control_channel};
use crate::manager::{Inner, Shared};
use crate::source::{DeviceSource, EventAction, NativeDevice, SourceEvent};
use crate::types::DeviceId;
use crate::{Error, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::os::fd::AsFd;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of the monitor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Opening the live-event monitor
    Starting,
    /// Waiting for device events or shutdown
    Running,
    /// Releasing the live-event monitor
    Draining,
    /// Thread finished (or never started)
    Stopped,
}

/// State of one monitor thread, shared with its [`MonitorHandle`]
///
/// Every spawned thread gets its own cell, so a previous thread that is
/// still winding down cannot overwrite the state of its successor.
#[derive(Debug)]
struct StateCell(Mutex<MonitorState>);

impl StateCell {
    fn new(state: MonitorState) -> Self {
        Self(Mutex::new(state))
    }

    fn set(&self, state: MonitorState) {
        debug!("Monitor state -> {:?}", state);
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn get(&self) -> MonitorState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Notification produced by applying one event, delivered after unlocking
struct Notification {
    id: DeviceId,
    connected: bool,
    callback: Option<DeviceCallback>,
}

/// Running monitor thread and the signal side of its control channel
#[derive(Debug)]
pub(crate) struct MonitorHandle {
    signal: ShutdownSignal,
    state: Arc<StateCell>,
    thread: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub(crate) fn state(&self) -> MonitorState {
        self.state.get()
    }

    /// Close the control channel and wait for the thread to end
    ///
    /// When called from the monitor thread itself (a callback terminating the
    /// manager) the join is skipped; the loop exits as soon as the callback
    /// returns. That thread only touches its own listener and state cell on
    /// the way out, so a monitor started in the meantime is unaffected.
    pub(crate) fn stop(self) {
        let MonitorHandle {
            mut signal, thread, ..
        } = self;
        signal.close();

        if thread.thread().id() == std::thread::current().id() {
            warn!("Monitor stop requested from the monitor thread; not joining");
            return;
        }

        if let Err(e) = thread.join() {
            error!("Monitor thread panicked: {:?}", e);
        }
    }
}

/// Spawn the monitor thread
pub(crate) fn spawn_monitor<S: DeviceSource>(shared: Arc<Shared<S>>) -> Result<MonitorHandle> {
    let (signal, waiter) = control_channel()?;
    let state = Arc::new(StateCell::new(MonitorState::Starting));

    let thread_state = Arc::clone(&state);
    let thread = std::thread::Builder::new()
        .name("usbctrl-monitor".to_string())
        .spawn(move || run(shared, waiter, thread_state))
        .map_err(|e| Error::MonitoringFailure(format!("could not launch monitor thread: {}", e)))?;

    Ok(MonitorHandle {
        signal,
        state,
        thread,
    })
}

fn run<S: DeviceSource>(shared: Arc<Shared<S>>, waiter: ShutdownWaiter, state: Arc<StateCell>) {
    info!("Monitor thread launched");

    let started = shared.lock().source.start_listening();
    let listener = match started {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not start device monitoring: {}", e);
            state.set(MonitorState::Stopped);
            return;
        }
    };

    state.set(MonitorState::Running);
    match watch(&shared, &waiter, &listener) {
        Ok(()) => info!("Detected end of control channel, shutting down"),
        Err(e) => error!("Device monitoring stopped: {}", e),
    }

    state.set(MonitorState::Draining);
    {
        // Listener teardown touches the subsystem context
        let _inner = shared.lock();
        drop(listener);
    }
    state.set(MonitorState::Stopped);
    info!("Monitor thread shutting down");
}

/// Running state: returns `Ok` on shutdown request, `Err` on poll failure
fn watch<S: DeviceSource>(
    shared: &Shared<S>,
    waiter: &ShutdownWaiter,
    listener: &S::Listener,
) -> Result<()> {
    loop {
        let mut fds = [
            PollFd::new(waiter.as_fd(), PollFlags::POLLIN),
            PollFd::new(listener.as_fd(), PollFlags::POLLIN),
        ];

        let ready = match poll(&mut fds, PollTimeout::NONE) {
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(Error::MonitoringFailure(format!("poll failed: {}", e))),
        };
        debug!("Unblocking now, {} descriptors ready", ready);

        if ready <= 0 {
            return Err(Error::MonitoringFailure(format!(
                "poll returned {} without timeout",
                ready
            )));
        }

        let control = fds[0].revents().unwrap_or(PollFlags::empty());
        let events = fds[1].revents().unwrap_or(PollFlags::empty());

        // Shutdown wins over a pending device event
        if !control.is_empty() && waiter.observed_close()? {
            return Ok(());
        }

        if events.contains(PollFlags::POLLIN) {
            process_event(shared, listener);
        } else if events.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            return Err(Error::MonitoringFailure(format!(
                "live-event descriptor reported {:?}",
                events
            )));
        }
    }
}

/// Pull one event, apply it under the lock, notify after unlocking
pub(crate) fn process_event<S: DeviceSource>(shared: &Shared<S>, listener: &S::Listener) {
    let notification = {
        let mut inner = shared.lock();
        match inner.source.receive_event(listener) {
            Some(event) => apply_event(&mut inner, event),
            None => {
                error!("Live-event descriptor was ready but no event could be received");
                None
            }
        }
    };

    if let Some(Notification {
        id,
        connected,
        callback: Some(callback),
    }) = notification
    {
        debug!("Notifying callback: device {} connected={}", id, connected);
        callback::invoke(&callback, id, connected);
    }
}

fn apply_event<S: DeviceSource>(
    inner: &mut Inner<S>,
    event: SourceEvent<S::Device>,
) -> Option<Notification> {
    let SourceEvent { action, device } = event;

    let applied = match action {
        EventAction::Add => match device.devnode() {
            // The handle moves into the registry here
            Some(devnode) => match inner.registry.add(device, devnode) {
                Ok(id) => {
                    info!("Device {} attached", id);
                    Some((id, true))
                }
                Err(e) => {
                    error!("Could not record attached device: {}", e);
                    None
                }
            },
            None => {
                warn!("Malformed event: add without device node");
                None
            }
        },
        EventAction::Remove => {
            let removed = match device.devnode() {
                Some(devnode) => {
                    let removed = inner.registry.remove(&devnode);
                    if removed.is_none() {
                        warn!("Found no record for removed device {}", devnode);
                    }
                    removed
                }
                None => {
                    warn!("Malformed event: remove without device node");
                    None
                }
            };
            drop(device);
            removed.map(|id| {
                info!("Device {} removed", id);
                (id, false)
            })
        }
        EventAction::Other(action) => {
            debug!("Ignoring '{}' event", action);
            None
        }
    };

    applied.map(|(id, connected)| Notification {
        id,
        connected,
        callback: inner.dispatcher.current(),
    })
}
