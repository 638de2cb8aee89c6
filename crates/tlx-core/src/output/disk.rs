//! Disk output: persist a transmission into the overflow store.

use std::sync::Arc;

use tlx_common::Transmission;
use tlx_store::{DiskStore, EntryId, StoreError, StoreStats};

#[derive(Clone)]
pub struct DiskOutput {
    store: Arc<DiskStore>,
}

impl DiskOutput {
    pub fn new(store: Arc<DiskStore>) -> Self {
        DiskOutput { store }
    }

    /// Write one payload. Fails with `CapacityExceeded` when the store is
    /// full; nothing already stored is evicted.
    pub fn send(&self, transmission: &Transmission) -> Result<EntryId, StoreError> {
        self.store.persist(transmission)
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn store(&self) -> &Arc<DiskStore> {
        &self.store
    }
}
