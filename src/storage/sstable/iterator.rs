//! SSTable Iterator
//!
//! Sequential iteration over the data block of an SSTable.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use bytes::Buf;

use crate::error::Result;

use super::{ENTRY_HEADER_SIZE, HEADER_SIZE, TOMBSTONE_MARKER};

/// `(key, value)`; a `None` value is a tombstone
pub type ScannedEntry = (Vec<u8>, Option<Vec<u8>>);

/// Iterator over SSTable entries in sorted key order
pub struct SSTableIterator<'a> {
    file: &'a mut BufReader<File>,
    /// Start of the index block
    end_offset: u64,
    offset: u64,
}

impl<'a> SSTableIterator<'a> {
    pub(super) fn new(file: &'a mut BufReader<File>, end_offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            offset: HEADER_SIZE,
        })
    }

    fn read_entry(&mut self) -> Result<ScannedEntry> {
        let mut head = [0u8; ENTRY_HEADER_SIZE];
        self.file.read_exact(&mut head)?;
        let mut cursor = &head[..];
        let key_len = cursor.get_u32_le() as usize;
        let val_len = cursor.get_u32_le();

        let mut key = vec![0u8; key_len];
        self.file.read_exact(&mut key)?;
        let mut consumed = ENTRY_HEADER_SIZE + key_len;

        let value = if val_len == TOMBSTONE_MARKER {
            None
        } else {
            let mut value = vec![0u8; val_len as usize];
            self.file.read_exact(&mut value)?;
            consumed += value.len();
            Some(value)
        };

        self.offset += consumed as u64;
        Ok((key, value))
    }
}

impl<'a> Iterator for SSTableIterator<'a> {
    type Item = Result<ScannedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end_offset {
            return None;
        }
        match self.read_entry() {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                // Stop after the first failure
                self.offset = self.end_offset;
                Some(Err(e))
            }
        }
    }
}
