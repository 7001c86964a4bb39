//! Item layout
//!
//! Pure data-format logic for the contiguous item buffer.
//!
//! ## Layout
//! ```text
//! ┌──────────────┬─────────────────┬──────────────────────┬───────────────────┐
//! │ Header (8)   │ Key + NUL       │ Suffix               │ Data              │
//! │              │ (nkey + 1)      │ " <flags> <len>\r\n" │ value + "\r\n"    │
//! │              │                 │ (nsuffix <= 40)      │ (nbytes)          │
//! └──────────────┴─────────────────┴──────────────────────┴───────────────────┘
//!
//! Header: nbytes u32 | nkey u16 | nsuffix u8 | magic u8   (little endian)
//! ```
//!
//! The total size is never stored; it is always recomputed from the header,
//! so an item buffer is self-describing. Flags live only in the suffix.

use std::io::Write;
use std::ops::Range;

use bytes::{Buf, BufMut};

use crate::error::{Result, StashError};

/// Fixed header size: nbytes (4) + nkey (2) + nsuffix (1) + magic (1)
pub const HEADER_SIZE: usize = 8;

/// Upper bound on the formatted suffix
pub const MAX_SUFFIX_LENGTH: usize = 40;

/// Longest key accepted by the layout
pub const MAX_KEY_LENGTH: usize = 250;

/// Every stored value carries this trailing terminator inside `nbytes`
pub const VALUE_TERMINATOR: &[u8; 2] = b"\r\n";

/// Sentinel byte marking a header written by this layout
const ITEM_MAGIC: u8 = 0xA7;

// =============================================================================
// Header
// =============================================================================

/// Fixed-size item header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHeader {
    /// Value length including the trailing `\r\n`
    pub nbytes: u32,
    /// Key length (the NUL terminator is not counted)
    pub nkey: u16,
    /// Suffix length
    pub nsuffix: u8,
}

impl ItemHeader {
    /// Total item size implied by this header
    pub fn ntotal(&self) -> usize {
        HEADER_SIZE + (self.nkey as usize + 1) + self.nsuffix as usize + self.nbytes as usize
    }

    /// Serialize the header
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        {
            let mut cursor: &mut [u8] = &mut out;
            cursor.put_u32_le(self.nbytes);
            cursor.put_u16_le(self.nkey);
            cursor.put_u8(self.nsuffix);
            cursor.put_u8(ITEM_MAGIC);
        }
        out
    }

    /// Deserialize and range-check a header from the front of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StashError::MalformedItem(format!(
                "buffer of {} bytes cannot hold a {} byte header",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let mut cursor = &buf[..HEADER_SIZE];
        let nbytes = cursor.get_u32_le();
        let nkey = cursor.get_u16_le();
        let nsuffix = cursor.get_u8();
        let magic = cursor.get_u8();

        if magic != ITEM_MAGIC {
            return Err(StashError::MalformedItem(format!(
                "bad header magic 0x{:02x}",
                magic
            )));
        }
        if (nbytes as usize) < VALUE_TERMINATOR.len() {
            return Err(StashError::MalformedItem(format!(
                "value length {} is shorter than its terminator",
                nbytes
            )));
        }
        if nkey as usize > MAX_KEY_LENGTH {
            return Err(StashError::MalformedItem(format!("key length {} out of range", nkey)));
        }
        if nsuffix as usize > MAX_SUFFIX_LENGTH {
            return Err(StashError::MalformedItem(format!(
                "suffix length {} out of range",
                nsuffix
            )));
        }

        Ok(Self { nbytes, nkey, nsuffix })
    }
}

// =============================================================================
// Suffix
// =============================================================================

/// The formatted `" <flags> <len>\r\n"` suffix, held on the stack
#[derive(Clone, Copy)]
pub struct Suffix {
    bytes: [u8; MAX_SUFFIX_LENGTH],
    len: u8,
}

impl Suffix {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for Suffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Suffix({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Format the suffix into a bounded buffer; overflowing 40 bytes is an error
pub fn format_suffix(flags: u32, nbytes: usize) -> Result<Suffix> {
    if nbytes < VALUE_TERMINATOR.len() {
        return Err(StashError::InvalidValueLength(nbytes));
    }

    let mut bytes = [0u8; MAX_SUFFIX_LENGTH];
    let written = {
        let mut cursor: &mut [u8] = &mut bytes;
        write!(cursor, " {} {}\r\n", flags, nbytes - VALUE_TERMINATOR.len()).map_err(|_| {
            StashError::MalformedItem(format!(
                "suffix for flags={} nbytes={} exceeds {} bytes",
                flags, nbytes, MAX_SUFFIX_LENGTH
            ))
        })?;
        MAX_SUFFIX_LENGTH - cursor.len()
    };

    Ok(Suffix {
        bytes,
        len: written as u8,
    })
}

/// Parse a suffix back into `(flags, value_len)`
///
/// `value_len` is the logical value length, i.e. `nbytes - 2`.
pub fn parse_suffix(suffix: &[u8]) -> Result<(u32, usize)> {
    let malformed = || {
        StashError::MalformedItem(format!(
            "unparseable suffix {:?}",
            String::from_utf8_lossy(suffix)
        ))
    };

    let text = std::str::from_utf8(suffix).map_err(|_| malformed())?;
    let body = text
        .strip_prefix(' ')
        .and_then(|s| s.strip_suffix("\r\n"))
        .ok_or_else(malformed)?;
    let (flags, len) = body.split_once(' ').ok_or_else(malformed)?;

    let flags = flags.parse::<u32>().map_err(|_| malformed())?;
    let len = len.parse::<usize>().map_err(|_| malformed())?;
    Ok((flags, len))
}

/// Compute the header and suffix for a fresh item
///
/// `nbytes` must include the 2-byte terminator. The total item size is
/// `header.ntotal()`.
pub fn compute_header(nkey: usize, flags: u32, nbytes: usize) -> Result<(ItemHeader, Suffix)> {
    if nkey > MAX_KEY_LENGTH {
        return Err(StashError::KeyTooLong(nkey));
    }
    if nbytes < VALUE_TERMINATOR.len() || nbytes > u32::MAX as usize {
        return Err(StashError::InvalidValueLength(nbytes));
    }

    let suffix = format_suffix(flags, nbytes)?;
    let header = ItemHeader {
        nbytes: nbytes as u32,
        nkey: nkey as u16,
        nsuffix: suffix.len() as u8,
    };
    Ok((header, suffix))
}

/// Size of the smallest item the layout can describe (empty key, empty value)
pub fn min_item_size() -> usize {
    // " 0 0\r\n"
    HEADER_SIZE + 1 + 6 + VALUE_TERMINATOR.len()
}

// =============================================================================
// Validated Layout
// =============================================================================

/// Header validated against the buffer it was read from.
///
/// Holding one proves `ntotal <= buffer.len()`, so every span below is in
/// bounds for that buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLayout {
    header: ItemHeader,
}

impl ItemLayout {
    /// Decode the header of `buf` and check it fits the allocation
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = ItemHeader::decode(buf)?;
        let ntotal = header.ntotal();
        if ntotal > buf.len() {
            return Err(StashError::MalformedItem(format!(
                "header declares {} bytes but buffer holds {}",
                ntotal,
                buf.len()
            )));
        }
        Ok(Self { header })
    }

    pub fn header(&self) -> ItemHeader {
        self.header
    }

    pub fn ntotal(&self) -> usize {
        self.header.ntotal()
    }

    pub fn key_range(&self) -> Range<usize> {
        HEADER_SIZE..HEADER_SIZE + self.header.nkey as usize
    }

    pub fn suffix_range(&self) -> Range<usize> {
        let start = HEADER_SIZE + self.header.nkey as usize + 1;
        start..start + self.header.nsuffix as usize
    }

    /// Value span including the trailing terminator
    pub fn data_range(&self) -> Range<usize> {
        let start = self.suffix_range().end;
        start..start + self.header.nbytes as usize
    }
}
