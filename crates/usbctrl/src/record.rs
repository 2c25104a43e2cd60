//! Device record
//!
//! One tracked device: its identifier, the native handle it owns and the
//! device node path used to match removal events.

use crate::types::DeviceId;
use tracing::debug;

/// One attached device
///
/// The record is the only owner of its native handle. It is not `Clone`, and
/// the handle is released exactly once, when the record is dropped.
pub struct DeviceRecord<D> {
    id: DeviceId,
    device: D,
    devnode: String,
}

impl<D> DeviceRecord<D> {
    pub fn new(id: DeviceId, device: D, devnode: String) -> Self {
        debug!("Adding device {} ({})", id, devnode);
        Self {
            id,
            device,
            devnode,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Borrow the native handle
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn devnode(&self) -> &str {
        &self.devnode
    }
}

impl<D> Drop for DeviceRecord<D> {
    fn drop(&mut self) {
        debug!("Releasing device {} ({})", self.id, self.devnode);
    }
}

impl<D> std::fmt::Debug for DeviceRecord<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("id", &self.id)
            .field("devnode", &self.devnode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe(Arc<AtomicUsize>);

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_record_accessors() {
        let record = DeviceRecord::new(DeviceId(4), "handle", "/dev/bus/usb/001/004".to_string());
        assert_eq!(record.id(), DeviceId(4));
        assert_eq!(*record.device(), "handle");
        assert_eq!(record.devnode(), "/dev/bus/usb/001/004");
    }

    #[test]
    fn test_handle_released_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let record = DeviceRecord::new(
            DeviceId(1),
            Probe(Arc::clone(&released)),
            "/dev/bus/usb/001/002".to_string(),
        );
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(record);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_omits_handle() {
        let record = DeviceRecord::new(DeviceId(9), (), "/dev/bus/usb/002/001".to_string());
        let dbg = format!("{:?}", record);
        assert!(dbg.contains("/dev/bus/usb/002/001"));
        assert!(dbg.contains("DeviceId(9)"));
    }
}
