//! Identifier types

use std::fmt;

/// Caller-visible device identifier
///
/// Assigned by the registry when a device is added, starting at 1. An
/// identifier is never handed out twice within one process, even after the
/// device it named has been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DeviceId> for u32 {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}
