//! Control channel
//!
//! A pipe used for one thing only: waking the monitor thread so it shuts
//! down. No messages are ever written; dropping the [`ShutdownSignal`]
//! closes the write end and the [`ShutdownWaiter`] then reads end-of-file.

use crate::Result;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use tracing::debug;

/// Signal side of the control channel
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: Option<OwnedFd>,
}

impl ShutdownSignal {
    /// Close the write end; the waiter observes end-of-channel
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            debug!("Control channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wait side of the control channel, polled by the monitor thread
#[derive(Debug)]
pub struct ShutdownWaiter {
    rx: File,
}

impl ShutdownWaiter {
    /// Drain the readable end; `true` once the signal side has been closed
    ///
    /// Only called after `poll` reported the descriptor readable, so the read
    /// does not block. Stray bytes are discarded and do not count as a
    /// shutdown request.
    pub fn observed_close(&self) -> Result<bool> {
        let mut buf = [0u8; 64];
        let n = (&self.rx).read(&mut buf)?;
        if n > 0 {
            debug!("Discarded {} unexpected bytes on control channel", n);
        }
        Ok(n == 0)
    }
}

impl AsFd for ShutdownWaiter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.rx.as_fd()
    }
}

/// Create a connected signal/waiter pair
pub fn control_channel() -> Result<(ShutdownSignal, ShutdownWaiter)> {
    let (rx, tx) = nix::unistd::pipe()?;
    Ok((
        ShutdownSignal { tx: Some(tx) },
        ShutdownWaiter { rx: File::from(rx) },
    ))
}
