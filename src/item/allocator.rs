//! Item allocator
//!
//! Allocates and releases item buffers, choosing between the pool and a
//! direct allocation by comparing the item's total size with the pool's
//! standard buffer size.

use crate::config::Config;
use crate::error::Result;

use super::freelist::{alloc_zeroed, ItemPool};
use super::layout::{compute_header, ItemLayout, HEADER_SIZE};
use super::Item;

/// Allocates pool-sized items from the freelist and oversized ones directly
pub struct ItemAllocator {
    pool: ItemPool,
}

impl ItemAllocator {
    /// Create an allocator whose pool hands out `item_buf_size` buffers
    pub fn new(item_buf_size: usize) -> Self {
        Self::with_pool(ItemPool::new(item_buf_size))
    }

    /// Create an allocator over an existing pool
    pub fn with_pool(pool: ItemPool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.item_buf_size)
    }

    /// Threshold between pool-sized and oversized items
    pub fn item_buf_size(&self) -> usize {
        self.pool.buffer_size()
    }

    pub fn pool(&self) -> &ItemPool {
        &self.pool
    }

    /// Allocate an item for `key` with room for `nbytes` of data.
    ///
    /// Header, key, and suffix are written; the data region is left for the
    /// caller to fill (it may hold stale bytes from a recycled buffer).
    /// `nbytes` includes the trailing `\r\n`.
    pub fn alloc_fresh(&self, key: &[u8], flags: u32, nbytes: usize) -> Result<Item> {
        let (header, suffix) = compute_header(key.len(), flags, nbytes)?;
        let ntotal = header.ntotal();

        let mut buf = self.obtain(ntotal)?;

        buf[..HEADER_SIZE].copy_from_slice(&header.encode());
        let key_end = HEADER_SIZE + key.len();
        buf[HEADER_SIZE..key_end].copy_from_slice(key);
        buf[key_end] = 0;
        let suffix_start = key_end + 1;
        buf[suffix_start..suffix_start + suffix.len()].copy_from_slice(suffix.as_bytes());

        Ok(Item::from_buffer(buf))
    }

    /// Allocate an uninitialized item buffer of at least `ntotal` bytes,
    /// to be filled by an engine read.
    pub fn alloc_raw(&self, ntotal: usize) -> Result<Item> {
        Ok(Item::from_buffer(self.obtain(ntotal)?))
    }

    /// Release an item. Never fails.
    ///
    /// The destination is decided from the item's own header: pool-sized
    /// items go back to the pool, oversized ones (or any item the full pool
    /// refuses) are freed directly. A buffer with no readable header is
    /// pooled only if it is a standard-sized buffer.
    pub fn release(&self, item: Item) {
        let buf = item.into_buffer();
        let item_buf_size = self.item_buf_size();

        let pool_sized = match ItemLayout::parse(&buf) {
            Ok(layout) => {
                let ntotal = layout.ntotal();
                if ntotal > item_buf_size {
                    tracing::trace!(ntotal, "oversized item, freeing directly");
                    return;
                }
                true
            }
            Err(_) => buf.len() == item_buf_size,
        };

        if !pool_sized {
            tracing::trace!(capacity = buf.len(), "unfilled buffer, freeing directly");
            return;
        }

        let capacity = buf.len();
        match self.pool.release(buf) {
            Ok(()) => tracing::trace!(capacity, "item buffer returned to freelist"),
            Err(_) => tracing::trace!(capacity, "freelist refused item buffer, freed directly"),
        }
    }

    /// Release an item if there is one
    pub fn release_opt(&self, item: Option<Item>) {
        if let Some(item) = item {
            self.release(item);
        }
    }

    fn obtain(&self, ntotal: usize) -> Result<Vec<u8>> {
        if ntotal > self.item_buf_size() {
            tracing::trace!(ntotal, "alloc item buffer directly");
            alloc_zeroed(ntotal)
        } else {
            tracing::trace!(ntotal, "alloc item buffer from freelist");
            self.pool.acquire()
        }
    }
}
