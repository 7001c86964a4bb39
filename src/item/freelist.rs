//! Item buffer freelist
//!
//! A bounded LIFO stack of standard-sized item buffers, reused to avoid
//! allocation churn on the hot path.
//!
//! `Freelist` is the unsynchronized core; `ItemPool` wraps it in a mutex and
//! is what the rest of the crate shares between worker threads.

use parking_lot::Mutex;

use crate::error::{Result, StashError};

/// Initial number of slots in the freelist
pub const INIT_FREELIST_LENGTH: usize = 500;

/// Hard ceiling on freelist slots; growth stops here
pub const MAX_FREELIST_LENGTH: usize = 4000;

/// Allocate a zero-filled buffer, reporting failure instead of aborting
pub(crate) fn alloc_zeroed(size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| StashError::Allocation { size })?;
    buf.resize(size, 0);
    Ok(buf)
}

// =============================================================================
// Unsynchronized Freelist
// =============================================================================

/// Not thread-safe. Callers must serialize access (see `ItemPool`).
pub(crate) struct Freelist {
    /// Recycled buffers, most recently released on top
    buffers: Vec<Vec<u8>>,
    /// Logical slot count; doubles on demand up to `max_capacity`
    capacity: usize,
    max_capacity: usize,
}

impl Freelist {
    pub(crate) fn with_limits(initial: usize, max_capacity: usize) -> Self {
        let max_capacity = max_capacity.max(1);
        let capacity = initial.clamp(1, max_capacity);
        Self {
            buffers: Vec::with_capacity(capacity),
            capacity,
            max_capacity,
        }
    }

    /// Pop the most recently released buffer, if any
    pub(crate) fn pop(&mut self) -> Option<Vec<u8>> {
        self.buffers.pop()
    }

    /// Push a buffer, growing the slot array when full.
    ///
    /// Hands the buffer back when the ceiling is reached or growth fails, so
    /// the caller can drop it directly.
    pub(crate) fn push(&mut self, buf: Vec<u8>) -> std::result::Result<(), Vec<u8>> {
        if self.buffers.len() < self.capacity {
            self.buffers.push(buf);
            return Ok(());
        }

        if self.capacity >= self.max_capacity {
            return Err(buf);
        }

        let grown = (self.capacity * 2).min(self.max_capacity);
        if self
            .buffers
            .try_reserve_exact(grown - self.buffers.len())
            .is_err()
        {
            return Err(buf);
        }
        self.capacity = grown;
        self.buffers.push(buf);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn max_capacity(&self) -> usize {
        self.max_capacity
    }
}

// =============================================================================
// Shared Pool
// =============================================================================

/// Thread-safe pool of fixed-size item buffers
///
/// Every buffer handed out or accepted is exactly `buffer_size` bytes long.
/// Fresh buffers are zero-filled; recycled ones keep their stale contents.
pub struct ItemPool {
    freelist: Mutex<Freelist>,
    buffer_size: usize,
}

impl ItemPool {
    /// Create a pool with the default slot limits
    pub fn new(buffer_size: usize) -> Self {
        Self::with_limits(buffer_size, INIT_FREELIST_LENGTH, MAX_FREELIST_LENGTH)
    }

    /// Create a pool with explicit initial and maximum slot counts
    pub fn with_limits(buffer_size: usize, initial: usize, max_capacity: usize) -> Self {
        Self {
            freelist: Mutex::new(Freelist::with_limits(initial, max_capacity)),
            buffer_size,
        }
    }

    /// Take a buffer from the pool, or allocate a fresh zeroed one
    pub fn acquire(&self) -> Result<Vec<u8>> {
        let recycled = self.freelist.lock().pop();
        match recycled {
            Some(buf) => Ok(buf),
            None => alloc_zeroed(self.buffer_size),
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Gives the buffer back when the pool is at its ceiling or the buffer
    /// is not a standard-sized one.
    pub fn release(&self, buf: Vec<u8>) -> std::result::Result<(), Vec<u8>> {
        if buf.len() != self.buffer_size {
            return Err(buf);
        }
        self.freelist.lock().push(buf)
    }

    /// Size of every pooled buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently parked in the pool
    pub fn len(&self) -> usize {
        self.freelist.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot count
    pub fn capacity(&self) -> usize {
        self.freelist.lock().capacity()
    }

    /// Slot ceiling
    pub fn max_capacity(&self) -> usize {
        self.freelist.lock().max_capacity()
    }
}
