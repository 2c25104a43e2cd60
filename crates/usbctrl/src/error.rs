//! Device manager error types

use crate::types::DeviceId;
use thiserror::Error;

/// Errors surfaced by the device manager
///
/// Nothing in the manager panics across its public boundary; every failure
/// ends up as one of these variants or is logged by the monitor thread.
#[derive(Debug, Error)]
pub enum Error {
    /// Notification subsystem context or live-event monitor unavailable
    #[error("Startup failure: {0}")]
    StartupFailure(String),

    /// No record with this identifier is currently registered
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),

    /// The device exists but does not expose the requested attribute
    #[error("Property '{key}' not found on device {id}")]
    PropertyNotFound { id: DeviceId, key: String },

    /// The monitor loop could not be started or had to stop
    #[error("Monitoring failure: {0}")]
    MonitoringFailure(String),

    /// Every identifier has been handed out once already
    #[error("Device identifier space exhausted")]
    IdentifierSpaceExhausted,

    /// I/O error from the notification subsystem or the control pipe
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call failure
    #[error("System error: {0}")]
    Sys(#[from] nix::errno::Errno),
}

/// Type alias for device manager results
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the two "nothing there" outcomes callers are expected to handle
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DeviceNotFound(_) | Error::PropertyNotFound { .. })
    }
}
