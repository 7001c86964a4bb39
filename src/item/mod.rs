//! Item Module
//!
//! The unit of storage: a single contiguous buffer holding a fixed header,
//! the key, a formatted suffix, and the value.
//!
//! ## Responsibilities
//! - Item layout: header encoding, suffix formatting, size computation
//! - Buffer pool: recycle standard-sized buffers through a bounded freelist
//! - Allocation lifecycle: fresh items (key + flags + length) and raw items
//!   (size only, filled by an engine read)
//!
//! ## Sizing
//! An item is *pool-sized* when its total size fits `item_buf_size` and
//! *oversized* otherwise. The classification is recomputed from the header
//! on release, never remembered from allocation time.

pub mod allocator;
pub mod freelist;
pub mod layout;

pub use allocator::ItemAllocator;
pub use freelist::{ItemPool, INIT_FREELIST_LENGTH, MAX_FREELIST_LENGTH};
pub use layout::{
    ItemHeader, ItemLayout, HEADER_SIZE, MAX_KEY_LENGTH, MAX_SUFFIX_LENGTH, VALUE_TERMINATOR,
};

use crate::error::{Result, StashError};
use layout::parse_suffix;

/// An owned item buffer.
///
/// The buffer may be longer than the item it holds (pool buffers are always
/// `item_buf_size` bytes). Accessors validate the header against the buffer
/// length on every call, so a partially filled or corrupt buffer yields
/// `MalformedItem` instead of an out-of-bounds slice.
///
/// Items are released through [`ItemAllocator::release`]; dropping one
/// simply frees its memory.
pub struct Item {
    buf: Vec<u8>,
}

impl Item {
    pub(crate) fn from_buffer(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.buf
    }

    /// Length of the underlying allocation
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Validated layout of this item
    pub fn layout(&self) -> Result<ItemLayout> {
        ItemLayout::parse(&self.buf)
    }

    /// Total item size recomputed from the header
    pub fn ntotal(&self) -> Result<usize> {
        Ok(self.layout()?.ntotal())
    }

    pub fn key(&self) -> Result<&[u8]> {
        let layout = self.layout()?;
        Ok(&self.buf[layout.key_range()])
    }

    pub fn suffix(&self) -> Result<&[u8]> {
        let layout = self.layout()?;
        Ok(&self.buf[layout.suffix_range()])
    }

    /// Data region, including the trailing `\r\n`
    pub fn data(&self) -> Result<&[u8]> {
        let layout = self.layout()?;
        Ok(&self.buf[layout.data_range()])
    }

    /// Mutable data region for filling in the value
    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        let layout = self.layout()?;
        Ok(&mut self.buf[layout.data_range()])
    }

    /// Logical value (data without the trailing terminator)
    pub fn value(&self) -> Result<&[u8]> {
        let data = self.data()?;
        Ok(&data[..data.len() - VALUE_TERMINATOR.len()])
    }

    /// Flags, re-derived from the suffix
    pub fn flags(&self) -> Result<u32> {
        let (flags, _) = parse_suffix(self.suffix()?)?;
        Ok(flags)
    }

    /// Write `value` followed by the `\r\n` terminator into the data region
    pub fn set_value(&mut self, value: &[u8]) -> Result<()> {
        let data = self.data_mut()?;
        if data.len() != value.len() + VALUE_TERMINATOR.len() {
            return Err(StashError::InvalidValueLength(value.len() + VALUE_TERMINATOR.len()));
        }
        let (body, terminator) = data.split_at_mut(value.len());
        body.copy_from_slice(value);
        terminator.copy_from_slice(VALUE_TERMINATOR);
        Ok(())
    }

    /// The item's bytes, exactly `ntotal` long
    pub fn as_bytes(&self) -> Result<&[u8]> {
        let ntotal = self.ntotal()?;
        Ok(&self.buf[..ntotal])
    }

    /// The whole allocation, including any slack past `ntotal`
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// The whole allocation, for engines reading directly into it
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Item");
        out.field("capacity", &self.buf.len());
        match self.layout() {
            Ok(layout) => out
                .field("ntotal", &layout.ntotal())
                .field("key", &String::from_utf8_lossy(&self.buf[layout.key_range()])),
            Err(_) => out.field("ntotal", &"<unfilled>"),
        };
        out.finish()
    }
}
