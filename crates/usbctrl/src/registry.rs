//! Device registry
//!
//! Ordered collection of [`DeviceRecord`]s plus the identifier counter. The
//! registry itself is not synchronized; it lives inside the manager lock and
//! every operation below runs with that lock held.

use crate::record::DeviceRecord;
use crate::types::DeviceId;
use crate::{Error, Result};
use tracing::{debug, info};

/// Registry of live device records
pub struct Registry<D> {
    /// Records in insertion order
    records: Vec<DeviceRecord<D>>,
    /// Last identifier handed out; 0 means none yet
    last_id: u32,
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Registry<D> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            last_id: 0,
        }
    }

    /// Registry whose next identifier is `last_id + 1`
    #[cfg(test)]
    pub(crate) fn starting_after(last_id: u32) -> Self {
        Self {
            records: Vec::new(),
            last_id,
        }
    }

    /// Insert a record for `device`, taking ownership of the handle
    ///
    /// Identifiers never wrap. Once `u32::MAX` has been assigned every
    /// further add fails with [`Error::IdentifierSpaceExhausted`]; the handle
    /// is dropped and the registry is left unchanged.
    pub fn add(&mut self, device: D, devnode: String) -> Result<DeviceId> {
        let next = self
            .last_id
            .checked_add(1)
            .ok_or(Error::IdentifierSpaceExhausted)?;
        self.last_id = next;

        let id = DeviceId(next);
        self.records.push(DeviceRecord::new(id, device, devnode));
        Ok(id)
    }

    /// Remove the record whose node path equals `devnode` exactly
    ///
    /// Returns the identifier of the removed record. The record (and with it
    /// the native handle) is dropped before this returns.
    pub fn remove(&mut self, devnode: &str) -> Option<DeviceId> {
        let index = self.records.iter().position(|r| r.devnode() == devnode)?;
        let record = self.records.remove(index);
        let id = record.id();
        debug!("Removing record {} ({})", id, devnode);
        Some(id)
    }

    /// Borrow the native handle for `id`
    ///
    /// The reference lives no longer than the borrow of the registry, i.e.
    /// no longer than the lock guard it was reached through.
    pub fn find(&self, id: DeviceId) -> Option<&D> {
        self.record(id).map(DeviceRecord::device)
    }

    pub fn record(&self, id: DeviceId) -> Option<&DeviceRecord<D>> {
        self.records.iter().find(|r| r.id() == id)
    }

    /// Identifiers of all records, in insertion order
    pub fn snapshot_identifiers(&self) -> Vec<DeviceId> {
        self.records.iter().map(DeviceRecord::id).collect()
    }

    /// Drop every record, releasing all native handles
    ///
    /// The identifier counter is kept, so identifiers stay unique across
    /// resets.
    pub fn reset(&mut self) {
        if !self.records.is_empty() {
            info!("Clearing {} device records", self.records.len());
        }
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
