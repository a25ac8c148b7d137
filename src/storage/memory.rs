use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::{
    Storage,
    snapshot::{DatabaseImage, SnapshotHandle, SnapshotProvider},
};

/// Keeps database images in memory for the lifetime of the provider
#[derive(Default)]
pub struct MemorySnapshotProvider {
    images: Mutex<HashMap<u64, DatabaseImage>>,
    next_id: AtomicU64,
}

impl MemorySnapshotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots currently held
    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotProvider for MemorySnapshotProvider {
    fn snapshot(&self, storage: &Storage, database: &str) -> Result<SnapshotHandle> {
        let image = DatabaseImage::capture(storage, database)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.images.lock().insert(id, image);
        Ok(SnapshotHandle { id, database: database.to_string() })
    }

    fn restore(&self, storage: &Storage, handle: &SnapshotHandle) -> Result<()> {
        let images = self.images.lock();
        let image = images
            .get(&handle.id)
            .ok_or_else(|| Error::Internal(format!("snapshot {} is gone", handle.id)))?;
        image.restore(storage)
    }

    fn discard(&self, handle: &SnapshotHandle) -> Result<()> {
        self.images.lock().remove(&handle.id);
        Ok(())
    }
}
