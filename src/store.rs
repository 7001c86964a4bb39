//! Item Store
//!
//! get/put/delete/exists against a persistent backend, with item buffers
//! managed by the allocator.
//!
//! ## Read protocol
//! ```text
//!   alloc_raw(item_buf_size)
//!          │
//!          ▼
//!   backend.read(key, buf) ──► Found(len)       → validate, return item
//!          │               ──► NotFound         → release, None
//!          │               ──► error            → release, propagate
//!          ▼
//!   BufferTooSmall { required }
//!          │  release, alloc_raw(required), retry once
//!          ▼
//!   BufferTooSmall again    → release, Engine error
//! ```

use std::sync::Arc;

use crate::backend::{Backend, ReadStatus, RemoveStatus};
use crate::error::{Result, StashError};
use crate::item::{Item, ItemAllocator};

/// Reads per `get`: the first into a standard buffer, the second into a
/// buffer of the size the backend asked for.
pub const MAX_READ_ATTEMPTS: usize = 2;

/// Outcome of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Item-level access to a backend
///
/// Each call is one independent backend operation; the store adds no
/// consistency guarantees of its own.
pub struct ItemStore<B> {
    allocator: Arc<ItemAllocator>,
    backend: B,
}

impl<B: Backend> ItemStore<B> {
    pub fn new(allocator: Arc<ItemAllocator>, backend: B) -> Self {
        Self { allocator, backend }
    }

    pub fn allocator(&self) -> &Arc<ItemAllocator> {
        &self.allocator
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Fetch the item stored under `key`.
    ///
    /// The returned item is owned by the caller, who should hand it back
    /// through `allocator().release()`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Item>> {
        let mut item = self.allocator.alloc_raw(self.allocator.item_buf_size())?;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let status = match self.backend.read(key, item.buffer_mut()) {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!("backend read failed: {}", e);
                    self.allocator.release(item);
                    return Err(e);
                }
            };

            match status {
                ReadStatus::Found(len) => return self.accept(item, len).map(Some),
                ReadStatus::NotFound => {
                    self.allocator.release(item);
                    return Ok(None);
                }
                ReadStatus::BufferTooSmall { required } => {
                    let offered = item.capacity();
                    self.allocator.release(item);

                    if attempts >= MAX_READ_ATTEMPTS {
                        return Err(StashError::Engine(format!(
                            "value still does not fit after resize ({} bytes offered, {} required)",
                            offered, required
                        )));
                    }
                    if required <= offered {
                        return Err(StashError::Engine(format!(
                            "backend asked for {} bytes but {} were offered",
                            required, offered
                        )));
                    }

                    tracing::trace!(required, "item buffer too small, retrying");
                    item = self.allocator.alloc_raw(required)?;
                }
            }
        }
    }

    /// Store `item` under `key` as one atomic upsert. The item is borrowed;
    /// the caller still releases it.
    pub fn put(&self, key: &[u8], item: &Item) -> Result<()> {
        let bytes = item.as_bytes()?;
        self.backend.write(key, bytes).map_err(|e| {
            tracing::warn!("backend write failed: {}", e);
            e
        })
    }

    pub fn delete(&self, key: &[u8]) -> Result<DeleteOutcome> {
        match self.backend.remove(key) {
            Ok(RemoveStatus::Removed) => Ok(DeleteOutcome::Deleted),
            Ok(RemoveStatus::NotFound) => Ok(DeleteOutcome::NotFound),
            Err(e) => {
                tracing::warn!("backend delete failed: {}", e);
                Err(e)
            }
        }
    }

    /// Presence check. A backend failure is logged and reported as absent.
    pub fn exists(&self, key: &[u8]) -> bool {
        match self.backend.contains(key) {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!("backend exists check failed: {}", e);
                false
            }
        }
    }

    /// Check a filled buffer before handing it out
    fn accept(&self, item: Item, len: usize) -> Result<Item> {
        let checked = match item.layout() {
            Ok(layout) if layout.ntotal() == len => Ok(()),
            Ok(layout) => Err(StashError::MalformedItem(format!(
                "header declares {} bytes but backend returned {}",
                layout.ntotal(),
                len
            ))),
            Err(e) => Err(e),
        };

        match checked {
            Ok(()) => Ok(item),
            Err(e) => {
                self.allocator.release(item);
                Err(e)
            }
        }
    }
}
