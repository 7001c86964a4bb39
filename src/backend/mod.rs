//! Backend Module
//!
//! The interface to a persistent engine, as seen by the item store.
//!
//! ## Contract
//! - `read` copies the stored value into a caller-supplied buffer. When the
//!   buffer is too small it reports the exact size needed and leaves the
//!   buffer contents unspecified.
//! - `write`, `remove`, and `contains` are each a single atomic operation as
//!   provided by the engine; no transactions span calls.
//! - A missing key is a status, not an error.

mod memory;

use std::sync::Arc;

use crate::error::Result;

pub use memory::MemoryBackend;

/// Outcome of reading a key into a caller buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The value was copied; holds its length
    Found(usize),

    /// The value does not fit; retry with a buffer of `required` bytes
    BufferTooSmall { required: usize },

    /// No value stored under the key
    NotFound,
}

/// Outcome of removing a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveStatus {
    Removed,
    NotFound,
}

/// A persistent engine the item store reads from and writes to
pub trait Backend: Send + Sync {
    /// Read the value for `key` into `buf`
    fn read(&self, key: &[u8], buf: &mut [u8]) -> Result<ReadStatus>;

    /// Insert or replace the value for `key`
    fn write(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`
    fn remove(&self, key: &[u8]) -> Result<RemoveStatus>;

    /// Whether `key` is present, without reading its value
    fn contains(&self, key: &[u8]) -> Result<bool>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn read(&self, key: &[u8], buf: &mut [u8]) -> Result<ReadStatus> {
        (**self).read(key, buf)
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).write(key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<RemoveStatus> {
        (**self).remove(key)
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        (**self).contains(key)
    }
}

/// Copy `value` into `buf`, or report the size needed
pub(crate) fn copy_into(value: &[u8], buf: &mut [u8]) -> ReadStatus {
    if value.len() > buf.len() {
        return ReadStatus::BufferTooSmall {
            required: value.len(),
        };
    }
    buf[..value.len()].copy_from_slice(value);
    ReadStatus::Found(value.len())
}
